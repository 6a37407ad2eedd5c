use assert_matches::assert_matches;
use core_test_support::config_for_server;
use infsh_core::AsyncInference;
use infsh_core::Inference;
use infsh_core::InfshErr;
use infsh_core::RemoteSessionError;
use infsh_core::protocol::RunRequest;
use infsh_core::protocol::SessionRef;
use infsh_core::protocol::TaskStatus;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::header;
use wiremock::matchers::header_regex;
use wiremock::matchers::method;
use wiremock::matchers::path;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_run_posts_envelope_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .and(header("authorization", "Bearer test-key"))
        .and(header_regex("user-agent", "^inferencesh-rs/"))
        .and(body_json(json!({
            "app": "acme/echo",
            "function": "set_value",
            "input": {"key": "x", "value": 1},
            "session": "new",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "id": "task-1",
                "status": "COMPLETED",
                "session_id": "sess-9",
                "output": {"key": "x", "value": 1},
                "worker": "w-1",
            },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let config = config_for_server(&home, &server.uri());
    let (session_id, response) = tokio::task::spawn_blocking(move || {
        let client = Inference::new(&config).unwrap();
        let (handle, response) = client
            .start_session("acme/echo", "set_value", json!({"key": "x", "value": 1}))
            .unwrap();
        (handle.session_id().to_string(), response)
    })
    .await
    .unwrap();

    assert_eq!(session_id, "sess-9");
    assert_eq!(response.status, TaskStatus::Completed);
    assert_eq!(response.extra.get("worker"), Some(&json!("w-1")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_session_endpoints_map_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"message": "no such session"},
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/old/keepalive"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "data": null,
            "error": {"code": "session_expired", "message": "expired"},
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sessions/live"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": null,
        })))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let config = config_for_server(&home, &server.uri());
    let (get, keepalive, end, list) = tokio::task::spawn_blocking(move || {
        let sessions = Inference::new(&config).unwrap().sessions();
        (
            sessions.get("gone"),
            sessions.keepalive("old"),
            sessions.end("live"),
            sessions.list(),
        )
    })
    .await
    .unwrap();

    assert_matches!(
        get,
        Err(InfshErr::RemoteSession(RemoteSessionError::NotFound(id))) if id == "gone"
    );
    assert_matches!(
        keepalive,
        Err(InfshErr::RemoteSession(RemoteSessionError::Expired(id))) if id == "old"
    );
    assert_matches!(end, Ok(()));
    assert_eq!(list.unwrap(), Vec::new());
}

#[tokio::test]
async fn async_client_speaks_the_same_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(json!({
            "app": "acme/echo",
            "function": "get_value",
            "input": {"key": "x"},
            "session": "sess-9",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "running",
            "session_id": "sess-9",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/sess-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sess-9",
            "status": "active",
            "call_count": 3,
        })))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let client = AsyncInference::new(&config_for_server(&home, &server.uri())).unwrap();

    let response = client
        .run(
            &RunRequest::new("acme/echo", json!({"key": "x"}))
                .with_function("get_value")
                .with_session(SessionRef::existing("sess-9")),
        )
        .await
        .unwrap();
    assert_eq!(response.status, TaskStatus::Running);
    assert!(!response.status.is_terminal());

    let info = client.session("acme/echo", "sess-9").info().await.unwrap();
    assert_eq!(info.call_count, 3);
    assert!(info.is_active());
}

#[tokio::test]
async fn plain_text_server_error_becomes_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway upstream"))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let client = AsyncInference::new(&config_for_server(&home, &server.uri())).unwrap();
    let err = client
        .run(&RunRequest::new("acme/echo", json!({})))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        InfshErr::Api { status, code: None, message }
            if status.as_u16() == 502 && message == "bad gateway upstream"
    );
}
