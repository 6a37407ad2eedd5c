#![allow(clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use async_trait::async_trait;
use infsh_core::config::Config;
use infsh_core::config::ConfigOverrides;
use infsh_core::config::ConfigToml;
use infsh_core::error::InfshErr;
use infsh_core::error::Result;
use infsh_core::transport::AsyncTransport;
use infsh_core::transport::Transport;
use infsh_protocol::AppSession;
use infsh_protocol::RunRequest;
use infsh_protocol::SessionRef;
use infsh_protocol::SessionStatus;
use reqwest::Method;
use reqwest::StatusCode;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

pub fn load_default_config_for_test(inferencesh_home: &TempDir) -> Config {
    Config::load_from_base_config_with_overrides(
        ConfigToml::default(),
        ConfigOverrides::default(),
        inferencesh_home.path().to_path_buf(),
    )
    .expect("defaults for test should always succeed")
}

/// Config pointing at `base_url` with its cache inside `inferencesh_home`.
pub fn config_for_server(inferencesh_home: &TempDir, base_url: &str) -> Config {
    Config::load_from_base_config_with_overrides(
        ConfigToml::default(),
        ConfigOverrides {
            api_key: Some("test-key".to_string()),
            base_url: Some(base_url.to_string()),
            file_cache_dir: Some(inferencesh_home.path().join("files")),
            ..ConfigOverrides::default()
        },
        inferencesh_home.path().to_path_buf(),
    )
    .expect("test config should load")
}

/// Serves `body` at `GET route` and expects exactly `hits` requests.
pub async fn mount_download(server: &MockServer, route: &str, body: &[u8], hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(hits)
        .mount(server)
        .await;
}

/// Files directly below `dir` and one level down, for asserting on cache
/// contents.
pub fn cache_entries(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut entries = Vec::new();
    let Ok(top) = std::fs::read_dir(dir) else {
        return entries;
    };
    for entry in top.flatten() {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            if let Ok(inner) = std::fs::read_dir(&entry_path) {
                entries.extend(inner.flatten().map(|e| e.path()));
            }
        } else {
            entries.push(entry_path);
        }
    }
    entries.sort();
    entries
}

#[derive(Debug)]
struct StubSession {
    app: String,
    status: SessionStatus,
    call_count: u64,
    values: Map<String, Value>,
}

impl StubSession {
    fn record(&self, id: &str) -> Value {
        let session = AppSession {
            id: id.to_string(),
            status: self.status,
            call_count: self.call_count,
            app_id: Some(self.app.clone()),
            created_at: None,
            last_activity_at: None,
            expires_at: None,
            extra: Map::new(),
        };
        serde_json::to_value(session).expect("session record serializes")
    }
}

#[derive(Debug, Default)]
struct EngineState {
    next_session: u64,
    next_task: u64,
    sessions: BTreeMap<String, StubSession>,
    runs: Vec<RunRequest>,
    end_calls: Vec<String>,
    fail_next_end: bool,
}

/// In-memory execution engine implementing both transports.
///
/// Sessions are numbered `s1`, `s2`, ... in creation order. Supported
/// functions: `set_value`, `get_value`, `get_all`, `increment`, `echo` and
/// `fail`. Every `DELETE /sessions/{id}` is recorded, including failed ones.
#[derive(Debug, Default)]
pub struct StubEngine {
    state: Mutex<EngineState>,
}

impl StubEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("stub engine lock poisoned")
    }

    /// Session ids passed to `end`, in call order.
    pub fn end_calls(&self) -> Vec<String> {
        self.state().end_calls.clone()
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        self.state().runs.clone()
    }

    pub fn session_status(&self, session_id: &str) -> Option<SessionStatus> {
        self.state().sessions.get(session_id).map(|s| s.status)
    }

    /// Marks a session as expired, as if its idle deadline passed.
    pub fn expire(&self, session_id: &str) {
        if let Some(session) = self.state().sessions.get_mut(session_id) {
            session.status = SessionStatus::Expired;
        }
    }

    /// Makes the next `end` call fail with a server error.
    pub fn fail_next_end(&self) {
        self.state().fail_next_end = true;
    }

    fn handle(&self, method: Method, route: &str, body: Option<Value>) -> Result<Value> {
        let segments: Vec<String> = route
            .trim_start_matches('/')
            .split('/')
            .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let mut state = self.state();
        match (method, segments.as_slice()) {
            (Method::POST, ["run"]) => {
                let request: RunRequest = serde_json::from_value(body.unwrap_or(Value::Null))?;
                state.run(request)
            }
            (Method::GET, ["sessions"]) => Ok(Value::Array(
                state
                    .sessions
                    .iter()
                    .map(|(id, session)| session.record(id))
                    .collect(),
            )),
            (Method::GET, ["sessions", id]) => Ok(state.session(id)?.record(id)),
            (Method::POST, ["sessions", id, "keepalive"]) => {
                let session = state.open_session(id)?;
                Ok(session.record(id))
            }
            (Method::DELETE, ["sessions", id]) => {
                state.end_calls.push((*id).to_string());
                if std::mem::take(&mut state.fail_next_end) {
                    return Err(api_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal",
                        "failed to end session",
                    ));
                }
                let session = state.open_session(id)?;
                session.status = SessionStatus::Ended;
                Ok(Value::Null)
            }
            (method, _) => Err(api_error(
                StatusCode::NOT_FOUND,
                "route_not_found",
                &format!("no route for {method} {route}"),
            )),
        }
    }
}

impl EngineState {
    fn session(&mut self, id: &str) -> Result<&mut StubSession> {
        self.sessions.get_mut(id).ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "session_not_found",
                &format!("session {id} not found"),
            )
        })
    }

    /// Like [`EngineState::session`], but rejects expired and ended ones.
    fn open_session(&mut self, id: &str) -> Result<&mut StubSession> {
        let session = self.session(id)?;
        match session.status {
            SessionStatus::Expired => Err(api_error(
                StatusCode::GONE,
                "session_expired",
                &format!("session {id} expired"),
            )),
            SessionStatus::Ended => Err(api_error(
                StatusCode::CONFLICT,
                "session_ended",
                &format!("session {id} has ended"),
            )),
            _ => Ok(session),
        }
    }

    fn run(&mut self, request: RunRequest) -> Result<Value> {
        self.runs.push(request.clone());
        self.next_task += 1;
        let task_id = format!("task-{}", self.next_task);

        let session_id = match &request.session {
            None => None,
            Some(SessionRef::New) => {
                self.next_session += 1;
                let id = format!("s{}", self.next_session);
                self.sessions.insert(
                    id.clone(),
                    StubSession {
                        app: request.app.clone(),
                        status: SessionStatus::Active,
                        call_count: 0,
                        values: Map::new(),
                    },
                );
                Some(id)
            }
            Some(SessionRef::Existing(id)) => {
                self.open_session(id)?;
                Some(id.clone())
            }
        };

        let mut scratch = Map::new();
        let values = match &session_id {
            Some(id) => {
                let session = self.session(id)?;
                session.call_count += 1;
                &mut session.values
            }
            None => &mut scratch,
        };
        let output = call_function(request.function_name(), &request.input, values)?;

        let mut response = json!({
            "id": task_id,
            "status": "COMPLETED",
            "output": output,
        });
        if let Some(id) = session_id {
            response["session_id"] = Value::String(id);
        }
        Ok(response)
    }
}

fn call_function(function: &str, input: &Value, values: &mut Map<String, Value>) -> Result<Value> {
    let key = || {
        input
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or("counter")
            .to_string()
    };
    match function {
        "set_value" => {
            let value = input.get("value").cloned().unwrap_or(Value::Null);
            values.insert(key(), value);
            Ok(json!({"success": true}))
        }
        "get_value" => Ok(match values.get(&key()) {
            Some(value) => json!({"found": true, "value": value}),
            None => json!({"found": false, "value": null}),
        }),
        "get_all" => Ok(json!({"values": Value::Object(values.clone())})),
        "increment" => {
            let next = values.get(&key()).and_then(Value::as_i64).unwrap_or(0) + 1;
            values.insert(key(), json!(next));
            Ok(json!({"value": next}))
        }
        "echo" | "run" => Ok(input.clone()),
        "fail" => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "function_failed",
            input
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("function failed"),
        )),
        other => Err(api_error(
            StatusCode::BAD_REQUEST,
            "unknown_function",
            &format!("unknown function {other}"),
        )),
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> InfshErr {
    InfshErr::api(status, Some(code.to_string()), message)
}

impl Transport for StubEngine {
    fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        self.handle(method, path, body)
    }
}

#[async_trait]
impl AsyncTransport for StubEngine {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        self.handle(method, path, body)
    }
}
