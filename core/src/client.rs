//! Entry points: [`Inference`] blocks the calling thread, [`AsyncInference`]
//! suspends. Both are cheap to clone and share one transport.

use std::future::Future;
use std::sync::Arc;

use infsh_protocol::RunRequest;
use infsh_protocol::RunResponse;
use infsh_protocol::SessionRef;
use reqwest::Method;
use serde_json::Value;

use crate::config::Config;
use crate::config::ConfigOverrides;
use crate::error::InfshErr;
use crate::error::Result;
use crate::file::FileCache;
use crate::file::FileInput;
use crate::file::FileResource;
use crate::http_client::AsyncHttpTransport;
use crate::http_client::HttpTransport;
use crate::session_handle::AsyncSessionHandle;
use crate::session_handle::SessionHandle;
use crate::sessions::AsyncSessionsApi;
use crate::sessions::SessionsApi;
use crate::transport::AsyncTransport;
use crate::transport::Transport;

const RUN_PATH: &str = "/run";

fn run_body(request: &RunRequest) -> Result<Value> {
    tracing::debug!(
        "running {}/{} (session: {})",
        request.app,
        request.function_name(),
        request.session.as_ref().map_or("none", SessionRef::as_str)
    );
    Ok(serde_json::to_value(request)?)
}

fn new_session_request(app: &str, function: &str, input: Value) -> RunRequest {
    RunRequest::new(app, input)
        .with_function(function)
        .with_session(SessionRef::New)
}

fn started_session_id(app: &str, response: &RunResponse) -> Result<String> {
    match response.session_id.as_deref() {
        Some(id) if !id.is_empty() => {
            tracing::debug!("started session {id} for {app}");
            Ok(id.to_string())
        }
        _ => Err(InfshErr::MissingSessionId {
            app: app.to_string(),
        }),
    }
}

/// Blocking client.
#[derive(Clone)]
pub struct Inference {
    transport: Arc<dyn Transport>,
    file_cache: FileCache,
}

impl Inference {
    /// Client whose files land in `config.file_cache_dir`.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_transport(Arc::new(HttpTransport::new(config)?))
            .with_file_cache(config.file_cache()))
    }

    /// Client configured from `config.toml` and the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(&Config::load_with_overrides(ConfigOverrides::default())?)
    }

    /// Client over `transport` with the environment's file cache.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            file_cache: FileCache::from_env(),
        }
    }

    pub fn with_file_cache(mut self, file_cache: FileCache) -> Self {
        self.file_cache = file_cache;
        self
    }

    pub fn file_cache(&self) -> &FileCache {
        &self.file_cache
    }

    /// Resolves `input` through this client's file cache.
    pub fn file(&self, input: impl Into<FileInput>) -> Result<FileResource> {
        FileResource::resolve(input, &self.file_cache)
    }

    pub fn run(&self, request: &RunRequest) -> Result<RunResponse> {
        let body = run_body(request)?;
        let value = self.transport.request(Method::POST, RUN_PATH, Some(body))?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn sessions(&self) -> SessionsApi {
        SessionsApi::new(Arc::clone(&self.transport))
    }

    /// Handle over a session that already exists. No request is made.
    pub fn session(&self, app: impl Into<String>, session_id: impl Into<String>) -> SessionHandle {
        SessionHandle::new(self.clone(), app, session_id)
    }

    /// Runs `function` with `session: "new"` and binds a handle to the
    /// session the engine created.
    pub fn start_session(
        &self,
        app: &str,
        function: &str,
        input: Value,
    ) -> Result<(SessionHandle, RunResponse)> {
        let response = self.run(&new_session_request(app, function, input))?;
        let session_id = started_session_id(app, &response)?;
        Ok((self.session(app, session_id), response))
    }

    /// Scoped use of an existing session; see [`SessionHandle::scope`].
    pub fn with_session<T, F>(&self, app: &str, session_id: &str, body: F) -> Result<T>
    where
        F: FnOnce(&SessionHandle) -> Result<T>,
    {
        self.session(app, session_id).scope(body)
    }
}

/// Async client.
#[derive(Clone)]
pub struct AsyncInference {
    transport: Arc<dyn AsyncTransport>,
    file_cache: FileCache,
}

impl AsyncInference {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(
            Self::with_transport(Arc::new(AsyncHttpTransport::new(config)?))
                .with_file_cache(config.file_cache()),
        )
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&Config::load_with_overrides(ConfigOverrides::default())?)
    }

    pub fn with_transport(transport: Arc<dyn AsyncTransport>) -> Self {
        Self {
            transport,
            file_cache: FileCache::from_env(),
        }
    }

    pub fn with_file_cache(mut self, file_cache: FileCache) -> Self {
        self.file_cache = file_cache;
        self
    }

    pub fn file_cache(&self) -> &FileCache {
        &self.file_cache
    }

    pub async fn file(&self, input: impl Into<FileInput>) -> Result<FileResource> {
        FileResource::resolve_async(input, &self.file_cache).await
    }

    pub async fn run(&self, request: &RunRequest) -> Result<RunResponse> {
        let body = run_body(request)?;
        let value = self
            .transport
            .request(Method::POST, RUN_PATH, Some(body))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn sessions(&self) -> AsyncSessionsApi {
        AsyncSessionsApi::new(Arc::clone(&self.transport))
    }

    pub fn session(
        &self,
        app: impl Into<String>,
        session_id: impl Into<String>,
    ) -> AsyncSessionHandle {
        AsyncSessionHandle::new(self.clone(), app, session_id)
    }

    pub async fn start_session(
        &self,
        app: &str,
        function: &str,
        input: Value,
    ) -> Result<(AsyncSessionHandle, RunResponse)> {
        let response = self.run(&new_session_request(app, function, input)).await?;
        let session_id = started_session_id(app, &response)?;
        Ok((self.session(app, session_id), response))
    }

    pub async fn with_session<T, F, Fut>(&self, app: &str, session_id: &str, body: F) -> Result<T>
    where
        F: FnOnce(AsyncSessionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.session(app, session_id).scope(body).await
    }
}
