//! # Error Types
//!
//! Error handling shared by every Coldwatch crate that talks to a
//! [`ConditionalStore`](crate::store::ConditionalStore).

use thiserror::Error;

/// Errors raised by the core types and by store implementations.
///
/// A conditional write whose precondition does not hold is *not* an error:
/// it is reported as [`WriteOutcome::ConditionFailed`](crate::store::WriteOutcome).
/// Everything here is either a backend failure or bad input.
///
/// # Examples
///
/// ```rust
/// use coldwatch_core::CoreError;
///
/// let error = CoreError::unavailable("connection refused");
/// assert!(error.is_retryable());
/// ```
#[derive(Error, Debug)]
pub enum CoreError {
    /// The backing store could not be reached
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// A store call exceeded its deadline
    #[error("Timeout occurred: {operation}")]
    Timeout { operation: String },

    /// Durable storage failure (snapshot write, rename, read)
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// A persisted snapshot failed its integrity check
    #[error("Invalid snapshot: checksum expected {expected}, got {actual}")]
    InvalidSnapshot { expected: u32, actual: u32 },

    /// Key or collection name rejected by the store
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Caller supplied input that fails validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Transient backend conditions that a later attempt may get past.
    ///
    /// ```rust
    /// use coldwatch_core::CoreError;
    ///
    /// assert!(CoreError::timeout("lease renew").is_retryable());
    /// assert!(!CoreError::validation("empty sensor id").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }

    /// Errors caused by the caller rather than the backend (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidKey(_) | Self::Validation(_))
    }
}
