//! Root of the `infsh-core` library: the inference.sh client.

// Library code never writes to stdout/stderr; everything goes through
// `tracing`.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod client;
pub mod config;
pub mod error;
pub mod file;
pub mod http_client;
mod session_handle;
pub mod sessions;
pub mod transport;

pub use client::AsyncInference;
pub use client::Inference;
pub use error::InfshErr;
pub use error::RemoteSessionError;
pub use error::Result;
pub use file::FileCache;
pub use file::FileFields;
pub use file::FileInput;
pub use file::FileResource;
pub use session_handle::AsyncSessionHandle;
pub use session_handle::SessionHandle;
pub use sessions::AsyncSessionsApi;
pub use sessions::SessionsApi;

pub use infsh_protocol as protocol;
