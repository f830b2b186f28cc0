//! Error taxonomy for the synchronization path.
//!
//! Callers on the remote/queue path branch on these kinds: authentication and
//! malformed requests surface immediately, rate limiting is absorbed by the
//! limiter, network and generic API errors are retried up to a bound, and
//! storage errors carry their own kind so operators can tell a permission
//! problem from a flaky connection.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Credential invalid or expired. Never retried automatically.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote rejected the request shape. Likely a programming error.
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// Remote asked us to back off. Handled by the rate limiter, invisible
    /// to callers above it.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Connectivity problem (DNS, connect, timeout, broken stream).
    #[error("network error: {0}")]
    Network(String),

    /// Remote returned a failure we can name but not classify further.
    #[error("remote api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Local filesystem or permission failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The operation was cleared from a queue or stopped cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// A single-flight operation was already in progress.
    #[error("operation already running")]
    AlreadyRunning,
}

impl SyncError {
    /// Whether a bounded local retry is allowed to re-attempt this failure.
    /// Rate limiting is deliberately excluded: the limiter owns that path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Api { .. })
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}
