//! Handles bound to a single remote session.
//!
//! A handle remembers `(app, session_id)` so callers do not repeat them, and
//! tracks locally whether the session was ended through it. The flag is
//! shared between clones of the same handle.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use infsh_protocol::AppSession;
use infsh_protocol::DEFAULT_FUNCTION;
use infsh_protocol::RunRequest;
use infsh_protocol::RunResponse;
use infsh_protocol::SessionRef;
use serde_json::Value;

use crate::client::AsyncInference;
use crate::client::Inference;
use crate::error::InfshErr;
use crate::error::Result;
use crate::sessions::Classify;
use crate::sessions::classify_session_error;

/// Picks the error to report once a scoped body and the closing `end()` have
/// both run. The body's own failure wins; an `end()` failure on top of it is
/// only logged.
fn scope_outcome<T>(session_id: &str, body: Result<T>, ended: Result<()>) -> Result<T> {
    match (body, ended) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(end_err)) => Err(end_err),
        (Err(body_err), Ok(())) => Err(body_err),
        (Err(body_err), Err(end_err)) => {
            tracing::warn!("failed to end session {session_id} after error: {end_err}");
            Err(body_err)
        }
    }
}

#[derive(Debug, Clone)]
struct HandleState {
    app: String,
    session_id: String,
    ended: Arc<AtomicBool>,
}

impl HandleState {
    fn new(app: String, session_id: String) -> Self {
        Self {
            app,
            session_id,
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_ended() {
            return Err(InfshErr::SessionAlreadyEnded {
                session_id: self.session_id.clone(),
            });
        }
        Ok(())
    }

    fn mark_ended(&self) {
        self.ended.store(true, Ordering::SeqCst);
        tracing::debug!("session {} ended", self.session_id);
    }

    fn request(&self, function: &str, input: Value) -> RunRequest {
        RunRequest::new(self.app.clone(), input)
            .with_function(function)
            .with_session(SessionRef::existing(self.session_id.clone()))
    }
}

/// Blocking handle to one session of one app.
#[derive(Clone)]
pub struct SessionHandle {
    client: Inference,
    state: HandleState,
}

impl SessionHandle {
    pub(crate) fn new(client: Inference, app: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            client,
            state: HandleState::new(app.into(), session_id.into()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    pub fn app(&self) -> &str {
        &self.state.app
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }

    /// Runs `function` of the app inside this session.
    pub fn call(&self, function: &str, input: Value) -> Result<RunResponse> {
        self.state.ensure_open()?;
        self.client
            .run(&self.state.request(function, input))
            .map_err(|e| classify_session_error(e, self.session_id(), Classify::CodeOnly))
    }

    /// [`SessionHandle::call`] with the default `run` function.
    pub fn call_default(&self, input: Value) -> Result<RunResponse> {
        self.call(DEFAULT_FUNCTION, input)
    }

    pub fn info(&self) -> Result<AppSession> {
        self.client.sessions().get(self.session_id())
    }

    pub fn keepalive(&self) -> Result<AppSession> {
        self.client.sessions().keepalive(self.session_id())
    }

    /// Ends the session. Does nothing if this handle already ended it; the
    /// handle only counts as ended once the platform confirmed.
    pub fn end(&self) -> Result<()> {
        if self.is_ended() {
            return Ok(());
        }
        self.client.sessions().end(self.session_id())?;
        self.state.mark_ended();
        Ok(())
    }

    /// Runs `body`, then ends the session exactly once whatever the body
    /// returned. A panicking body still ends the session before the panic
    /// propagates.
    pub fn scope<T, F>(self, body: F) -> Result<T>
    where
        F: FnOnce(&SessionHandle) -> Result<T>,
    {
        let outcome = {
            let _guard = EndOnUnwind(&self);
            body(&self)
        };
        let ended = self.end();
        scope_outcome(self.session_id(), outcome, ended)
    }
}

/// Ends the session if dropped while the scoped body unwinds.
struct EndOnUnwind<'a>(&'a SessionHandle);

impl Drop for EndOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking()
            && let Err(e) = self.0.end()
        {
            tracing::warn!("failed to end session {} during panic: {e}", self.0.session_id());
        }
    }
}

/// Async handle to one session of one app.
#[derive(Clone)]
pub struct AsyncSessionHandle {
    client: AsyncInference,
    state: HandleState,
}

impl AsyncSessionHandle {
    pub(crate) fn new(
        client: AsyncInference,
        app: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            state: HandleState::new(app.into(), session_id.into()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    pub fn app(&self) -> &str {
        &self.state.app
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }

    pub async fn call(&self, function: &str, input: Value) -> Result<RunResponse> {
        self.state.ensure_open()?;
        self.client
            .run(&self.state.request(function, input))
            .await
            .map_err(|e| classify_session_error(e, self.session_id(), Classify::CodeOnly))
    }

    pub async fn call_default(&self, input: Value) -> Result<RunResponse> {
        self.call(DEFAULT_FUNCTION, input).await
    }

    pub async fn info(&self) -> Result<AppSession> {
        self.client.sessions().get(self.session_id()).await
    }

    pub async fn keepalive(&self) -> Result<AppSession> {
        self.client.sessions().keepalive(self.session_id()).await
    }

    pub async fn end(&self) -> Result<()> {
        if self.is_ended() {
            return Ok(());
        }
        self.client.sessions().end(self.session_id()).await?;
        self.state.mark_ended();
        Ok(())
    }

    /// Awaits `body` with a clone of this handle, then ends the session
    /// exactly once. If the returned future is dropped early the session is
    /// left open.
    pub async fn scope<T, F, Fut>(self, body: F) -> Result<T>
    where
        F: FnOnce(AsyncSessionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = body(self.clone()).await;
        let ended = self.end().await;
        scope_outcome(self.session_id(), outcome, ended)
    }
}
