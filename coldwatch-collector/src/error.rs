//! Error types for the collector service.

use coldwatch_core::CoreError;
use coldwatch_leader::LeaderError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Result type for collector operations
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors surfaced by the collector's operations
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Caller supplied input that fails validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backing store failed
    #[error("Store error: {0}")]
    Store(CoreError),

    /// Lease coordination failed
    #[error("Leader error: {0}")]
    Leader(#[from] LeaderError),

    /// A store call exceeded its deadline
    #[error("Timed out: {operation}")]
    Timeout { operation: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

impl CollectorError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CollectorError::InvalidInput(message.into())
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, CollectorError::InvalidInput(_))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            CollectorError::Store(err) => err.is_retryable(),
            CollectorError::Leader(err) => err.is_retryable(),
            CollectorError::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<CoreError> for CollectorError {
    fn from(err: CoreError) -> Self {
        if err.is_client_error() {
            CollectorError::InvalidInput(err.to_string())
        } else {
            CollectorError::Store(err)
        }
    }
}

/// Failures delivering a notification. Never retried.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("Notification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifyError>),
}

/// Run a store call under `timeout`, mapping the elapsed case to
/// [`CollectorError::Timeout`].
pub(crate) async fn bounded<T, F>(timeout: Duration, operation: &str, call: F) -> CollectorResult<T>
where
    F: Future<Output = coldwatch_core::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CollectorError::Timeout {
            operation: operation.to_string(),
        }),
    }
}
