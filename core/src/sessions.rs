//! Thin façade over the `/sessions` endpoints.

use std::sync::Arc;

use infsh_protocol::AppSession;
use reqwest::Method;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::InfshErr;
use crate::error::RemoteSessionError;
use crate::error::Result;
use crate::transport::AsyncTransport;
use crate::transport::Transport;

const SESSIONS_PATH: &str = "/sessions";

fn session_path(session_id: &str) -> String {
    format!("{SESSIONS_PATH}/{}", urlencoding::encode(session_id))
}

fn keepalive_path(session_id: &str) -> String {
    format!("{}/keepalive", session_path(session_id))
}

/// How much of an [`InfshErr::Api`] to trust when deciding whether it is about
/// the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Classify {
    /// Session endpoints: error codes and the 404/410 statuses.
    CodeOrStatus,
    /// Runs inside a session: only explicit error codes, since a 404 there
    /// may be about the app.
    CodeOnly,
}

/// Rewrites session-related API errors into [`RemoteSessionError`]s for
/// `session_id`. Everything else passes through untouched.
pub(crate) fn classify_session_error(err: InfshErr, session_id: &str, mode: Classify) -> InfshErr {
    let InfshErr::Api {
        status,
        code,
        message,
    } = err
    else {
        return err;
    };
    let id = session_id.to_string();
    let remote = match code.as_deref() {
        Some("session_not_found") => Some(RemoteSessionError::NotFound(id)),
        Some("session_expired") => Some(RemoteSessionError::Expired(id)),
        Some("session_ended") => Some(RemoteSessionError::AlreadyEnded(id)),
        _ if mode == Classify::CodeOnly => None,
        _ if status == StatusCode::NOT_FOUND => Some(RemoteSessionError::NotFound(id)),
        _ if status == StatusCode::GONE => Some(RemoteSessionError::Expired(id)),
        _ => None,
    };
    match remote {
        Some(remote) => {
            tracing::debug!("session {session_id}: {message}");
            InfshErr::RemoteSession(remote)
        }
        None => InfshErr::Api {
            status,
            code,
            message,
        },
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn decode_list(value: Value) -> Result<Vec<AppSession>> {
    match value {
        Value::Null => Ok(Vec::new()),
        value => decode(value),
    }
}

/// Blocking session management. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct SessionsApi {
    transport: Arc<dyn Transport>,
}

impl SessionsApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn get(&self, session_id: &str) -> Result<AppSession> {
        self.transport
            .request(Method::GET, &session_path(session_id), None)
            .and_then(decode)
            .map_err(|e| classify_session_error(e, session_id, Classify::CodeOrStatus))
    }

    /// Sessions owned by the caller. A `null` payload means none.
    pub fn list(&self) -> Result<Vec<AppSession>> {
        let value = self.transport.request(Method::GET, SESSIONS_PATH, None)?;
        decode_list(value)
    }

    /// Extends the idle deadline of a session.
    pub fn keepalive(&self, session_id: &str) -> Result<AppSession> {
        self.transport
            .request(Method::POST, &keepalive_path(session_id), None)
            .and_then(decode)
            .map_err(|e| classify_session_error(e, session_id, Classify::CodeOrStatus))
    }

    pub fn end(&self, session_id: &str) -> Result<()> {
        self.transport
            .request(Method::DELETE, &session_path(session_id), None)
            .map(|_| ())
            .map_err(|e| classify_session_error(e, session_id, Classify::CodeOrStatus))
    }
}

/// Async twin of [`SessionsApi`].
#[derive(Clone)]
pub struct AsyncSessionsApi {
    transport: Arc<dyn AsyncTransport>,
}

impl AsyncSessionsApi {
    pub fn new(transport: Arc<dyn AsyncTransport>) -> Self {
        Self { transport }
    }

    pub async fn get(&self, session_id: &str) -> Result<AppSession> {
        self.transport
            .request(Method::GET, &session_path(session_id), None)
            .await
            .and_then(decode)
            .map_err(|e| classify_session_error(e, session_id, Classify::CodeOrStatus))
    }

    pub async fn list(&self) -> Result<Vec<AppSession>> {
        let value = self
            .transport
            .request(Method::GET, SESSIONS_PATH, None)
            .await?;
        decode_list(value)
    }

    pub async fn keepalive(&self, session_id: &str) -> Result<AppSession> {
        self.transport
            .request(Method::POST, &keepalive_path(session_id), None)
            .await
            .and_then(decode)
            .map_err(|e| classify_session_error(e, session_id, Classify::CodeOrStatus))
    }

    pub async fn end(&self, session_id: &str) -> Result<()> {
        self.transport
            .request(Method::DELETE, &session_path(session_id), None)
            .await
            .map(|_| ())
            .map_err(|e| classify_session_error(e, session_id, Classify::CodeOrStatus))
    }
}
