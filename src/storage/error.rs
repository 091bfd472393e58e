//! Storage error types and the fault taxonomy.

use serde::Serialize;
use thiserror::Error;

use crate::resilience::{RetryError, Retryable};

/// Errors that can occur during persistence operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The requested entity does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// The backend call failed; may succeed on retry.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The circuit for this dependency is open and nothing stale is cached.
    #[error("Dependency '{dependency}' unavailable")]
    Unavailable { dependency: String },

    /// Every retry attempt failed.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// The backend does not implement this operation.
    #[error("Operation '{0}' not supported by backend")]
    Unsupported(&'static str),

    /// The request was rejected as malformed.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// A cached or stored value failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify this error in the fault taxonomy.
    pub fn class(&self) -> FaultClass {
        match self {
            StorageError::Backend(_) | StorageError::RetriesExhausted { .. } => {
                FaultClass::TransientBackendFailure
            }
            StorageError::Unavailable { .. } => FaultClass::BackendUnavailable,
            StorageError::Unsupported(_) => FaultClass::ConfigurationFault,
            StorageError::NotFound { .. }
            | StorageError::Invalid(_)
            | StorageError::Serialization(_) => FaultClass::Request,
        }
    }
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Backend(_))
    }
}

impl From<RetryError<StorageError>> for StorageError {
    fn from(err: RetryError<StorageError>) -> Self {
        match err {
            RetryError::Exhausted {
                operation,
                attempts,
                last,
            } => StorageError::RetriesExhausted {
                operation,
                attempts,
                last_error: last.to_string(),
            },
            RetryError::Aborted(e) => e,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Where a failure is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Retried locally; invisible unless exhausted.
    TransientBackendFailure,
    /// Breaker open; stale data or a typed error.
    BackendUnavailable,
    /// Routed to threat mitigation, never to a plain retry.
    SecurityThreat,
    /// Routed to an error correction strategy.
    OperationalFault,
    /// Missing capability; degraded mode, non-fatal.
    ConfigurationFault,
    /// Caller error (not found, invalid input); no remediation.
    Request,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_backend_errors_retry() {
        assert!(StorageError::Backend("timeout".into()).is_retryable());
        assert!(!StorageError::not_found("user", "u1").is_retryable());
        assert!(!StorageError::Unsupported("list_users").is_retryable());
    }

    #[test]
    fn test_exhausted_retry_maps_to_typed_error() {
        let err: StorageError = RetryError::Exhausted {
            operation: "get_user",
            attempts: 3,
            last: StorageError::Backend("connection reset".into()),
        }
        .into();
        assert!(matches!(err, StorageError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.class(), FaultClass::TransientBackendFailure);
        assert!(err.to_string().contains("connection reset"));
    }
}
