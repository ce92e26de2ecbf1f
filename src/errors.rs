//! Error types for the connection pool and the operations it runs

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`DocumentStore`](crate::DocumentStore) call.
///
/// `Remote` is a failure the store itself reported (optionally with a status
/// code); `Unexpected` is anything outside that contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("remote store error (status {status:?}): {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl OperationError {
    /// Store failure carrying a status code
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Store failure without a status code
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Remote {
            status: None,
            message: message.into(),
        }
    }

    /// Failure that no retry can fix, such as a malformed response
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Status code, if the store reported one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => *status,
            Self::Unexpected(_) => None,
        }
    }
}

/// How the retry executor treats an [`OperationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; try again after backing off
    Retryable,

    /// Authorization / not-found class; stop on first occurrence
    NonRetryable,

    /// Outside the known classification; fatal for the call
    Unexpected,
}

/// Errors returned by the pool and the retry executor
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("No connection became available within {0:?}")]
    PoolExhausted(Duration),

    #[error("All {attempts} attempts failed, last error: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: OperationError,
    },

    #[error("Operation failed with a non-retryable error: {0}")]
    NonRetryable(#[source] OperationError),

    #[error("Operation failed unexpectedly: {0}")]
    Unexpected(#[source] OperationError),

    #[error("Failed to open connection: {0}")]
    Connect(#[source] OperationError),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    /// The underlying store error, when there is one
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Self::RetryExhausted { last, .. } => Some(last),
            Self::NonRetryable(err) | Self::Unexpected(err) | Self::Connect(err) => Some(err),
            _ => None,
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_mentions_last_error() {
        let err = PoolError::RetryExhausted {
            attempts: 3,
            last: OperationError::transient("socket closed"),
        };
        let text = err.to_string();
        assert!(text.starts_with("All 3 attempts failed"), "got: {text}");
        assert!(text.contains("socket closed"), "got: {text}");
        assert_eq!(
            err.operation_error(),
            Some(&OperationError::transient("socket closed"))
        );
    }

    #[test]
    fn status_code_only_for_remote_errors() {
        assert_eq!(OperationError::status(404, "missing").status_code(), Some(404));
        assert_eq!(OperationError::transient("busy").status_code(), None);
        assert_eq!(OperationError::unexpected("boom").status_code(), None);
    }
}
