//! Error types for lease coordination.

use coldwatch_core::CoreError;
use thiserror::Error;

/// Result type for lease coordination
pub type LeaderResult<T> = Result<T, LeaderError>;

/// Errors that can occur while acquiring or renewing the lease
#[derive(Error, Debug)]
pub enum LeaderError {
    /// The lease store failed or was unreachable
    #[error("Lease store error: {0}")]
    Store(#[from] CoreError),

    /// A store call did not complete in time
    #[error("Lease store call timed out: {operation}")]
    Timeout { operation: String },

    /// The stored lease could not be decoded
    #[error("Corrupt lease record at {key}: {reason}")]
    CorruptLease { key: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },
}

impl LeaderError {
    pub fn config(reason: impl Into<String>) -> Self {
        LeaderError::ConfigError {
            reason: reason.into(),
        }
    }

    /// Store failures and timeouts clear up on their own; the coordinator
    /// keeps ticking through them.
    pub fn is_retryable(&self) -> bool {
        match self {
            LeaderError::Store(err) => err.is_retryable(),
            LeaderError::Timeout { .. } => true,
            _ => false,
        }
    }
}
