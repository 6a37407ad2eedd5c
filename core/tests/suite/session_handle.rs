use std::sync::Arc;

use assert_matches::assert_matches;
use core_test_support::StubEngine;
use infsh_core::Inference;
use infsh_core::InfshErr;
use infsh_core::RemoteSessionError;
use infsh_core::protocol::SessionStatus;
use pretty_assertions::assert_eq;
use serde_json::json;

const APP: &str = "acme/kv";

fn started() -> (Arc<StubEngine>, Inference, String) {
    let engine = StubEngine::new();
    let client = Inference::with_transport(engine.clone());
    let (handle, _) = client
        .start_session(APP, "set_value", json!({"key": "k", "value": "v"}))
        .unwrap();
    (engine, client, handle.session_id().to_string())
}

#[test]
fn scope_ends_session_exactly_once() {
    let (engine, client, session_id) = started();
    let handle = client.session(APP, &session_id);
    let observer = handle.clone();

    let value = handle
        .scope(|h| {
            let response = h.call("get_value", json!({"key": "k"}))?;
            Ok(response.output_field("value").cloned())
        })
        .unwrap();

    assert_eq!(value, Some(json!("v")));
    assert_eq!(engine.end_calls(), vec![session_id.clone()]);
    assert_eq!(engine.session_status(&session_id), Some(SessionStatus::Ended));
    assert!(observer.is_ended());

    assert_matches!(
        observer.call("get_value", json!({"key": "k"})),
        Err(InfshErr::SessionAlreadyEnded { session_id: id }) if id == session_id
    );
    observer.end().unwrap();
    assert_eq!(engine.end_calls().len(), 1);
}

#[test]
fn scope_ends_session_when_body_fails() {
    let (engine, client, session_id) = started();
    let handle = client.session(APP, &session_id);
    let observer = handle.clone();

    let outcome: infsh_core::Result<()> = handle.scope(|h| {
        h.call("fail", json!({"message": "boom"}))?;
        Ok(())
    });

    assert_matches!(outcome, Err(InfshErr::Api { message, .. }) if message == "boom");
    assert_eq!(engine.end_calls(), vec![session_id]);
    assert!(observer.is_ended());
}

#[test]
fn body_error_wins_when_end_also_fails() {
    let (engine, client, session_id) = started();
    engine.fail_next_end();
    let handle = client.session(APP, &session_id);
    let observer = handle.clone();

    let outcome: infsh_core::Result<()> =
        handle.scope(|_| Err(InfshErr::Config("body failed".to_string())));

    assert_matches!(outcome, Err(InfshErr::Config(msg)) if msg == "body failed");
    assert_eq!(engine.end_calls().len(), 1);
    assert!(!observer.is_ended());

    // The handle stays open, so ending can be retried.
    observer.end().unwrap();
    assert!(observer.is_ended());
    assert_eq!(engine.end_calls().len(), 2);
}

#[test]
fn end_failure_is_reported_when_body_succeeds() {
    let (engine, client, session_id) = started();
    engine.fail_next_end();

    let outcome = client.with_session(APP, &session_id, |h| {
        h.call("increment", json!({}))?;
        Ok(())
    });

    assert_matches!(outcome, Err(InfshErr::Api { code: Some(code), .. }) if code == "internal");
    assert_eq!(engine.end_calls(), vec![session_id]);
}

#[test]
fn end_is_idempotent_per_handle() {
    let (engine, client, session_id) = started();
    let handle = client.session(APP, &session_id);

    handle.end().unwrap();
    handle.end().unwrap();
    assert_eq!(engine.end_calls().len(), 1);

    // A fresh handle does not know the session ended.
    let fresh = client.session(APP, &session_id);
    assert_matches!(
        fresh.end(),
        Err(InfshErr::RemoteSession(RemoteSessionError::AlreadyEnded(_)))
    );
    assert!(!fresh.is_ended());
}

#[test]
fn info_and_keepalive_work_without_ended_check() {
    let (_engine, client, session_id) = started();
    let handle = client.session(APP, &session_id);
    handle.end().unwrap();

    let info = handle.info().unwrap();
    assert_eq!(info.status, SessionStatus::Ended);
    assert_matches!(
        handle.keepalive(),
        Err(InfshErr::RemoteSession(RemoteSessionError::AlreadyEnded(_)))
    );
}

#[test]
fn scope_ends_session_when_body_panics() {
    let (engine, client, session_id) = started();
    let handle = client.session(APP, &session_id);
    let observer = handle.clone();

    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        handle.scope(|h| -> infsh_core::Result<()> {
            h.call("increment", json!({}))?;
            panic!("body blew up");
        })
    }));

    assert!(panicked.is_err());
    assert_eq!(engine.end_calls(), vec![session_id.clone()]);
    assert_eq!(engine.session_status(&session_id), Some(SessionStatus::Ended));
    assert!(observer.is_ended());
}
