use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InfshErr>;

/// Failures reported by the session endpoints, keyed by the session id they
/// were raised for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteSessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session expired: {0}")]
    Expired(String),

    #[error("session already ended: {0}")]
    AlreadyEnded(String),
}

impl RemoteSessionError {
    pub fn session_id(&self) -> &str {
        match self {
            Self::NotFound(id) | Self::Expired(id) | Self::AlreadyEnded(id) => id,
        }
    }
}

#[derive(Error, Debug)]
pub enum InfshErr {
    /// A file reference was built from a value that is neither a string nor a
    /// field mapping.
    #[error("Invalid input for File: {0}")]
    InvalidInput(String),

    #[error("Either 'uri' or 'path' must be provided and be valid")]
    MissingLocation,

    #[error("Failed to download URL {url}: {source}")]
    DownloadFailed {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// A blocking download was requested on a thread that drives a
    /// current-thread async runtime.
    #[error(
        "cannot download {url} synchronously inside a current-thread async runtime; \
         use FileResource::resolve_async"
    )]
    BlockingDownloadInAsync { url: String },

    #[error("session {session_id} has been ended")]
    SessionAlreadyEnded { session_id: String },

    #[error(transparent)]
    RemoteSession(#[from] RemoteSessionError),

    /// A run started with `session: "new"` came back without a session id.
    #[error("run of app {app} did not return a session id")]
    MissingSessionId { app: String },

    /// Non-success HTTP status from the API.
    #[error("API request failed with status {status}: {message}")]
    Api {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl InfshErr {
    pub(crate) fn download(url: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            source: source.into(),
        }
    }

    pub fn api(status: StatusCode, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::RemoteSession(RemoteSessionError::NotFound(_)))
    }
}
