//! Error taxonomy for the gateway, following spec §7.
//!
//! Four independent enums mirror the spec's four non-MS-client error
//! surfaces; [`crate::ms_client::MsError`] covers the MS-specific
//! transient/logical/protocol split described in §4.F and §7.

use thiserror::Error;

/// Errors surfaced by a backend (local file, process, SQL) while serving a
/// block or manifest request. Maps onto the sentinel responses in §4.G.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend resource temporarily unavailable")]
    Again,
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend produced an unrecognized failure")]
    Unknown,
}

impl BackendError {
    /// The sentinel name used in logs and in the `X-AG-Error` debug header.
    pub fn sentinel(&self) -> &'static str {
        match self {
            BackendError::Again => "EAGAIN",
            BackendError::Io(_) => "EIO",
            BackendError::Unknown => "EUNKNOWN",
        }
    }
}

/// Top-level error type for gateway initialization and request handling
/// outside the MS client and backend layers.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration or initialization error: {0}")]
    Config(String),

    #[error("failed to start a required thread: {0}")]
    ThreadStart(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("ms client error: {0}")]
    Ms(#[from] crate::ms_client::MsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Process exit code per spec §6: 0 success, 1 config/init error, 2
    /// thread-start failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            GatewayError::ThreadStart(_) => 2,
            _ => 1,
        }
    }
}
