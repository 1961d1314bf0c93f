//! Error types for the LCM orchestrator.
//!
//! `LcmError` is what lifecycle workflows propagate. Collaborator errors keep
//! their own types so callers can inspect them (notably `RoError::http_code`)
//! before they are folded into an operation's `detailed-status`.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LcmError {
    /// Expected failure mode carrying an operator-readable message
    #[error("{0}")]
    Domain(String),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("RO error: {0}")]
    Ro(#[from] RoError),
    #[error("VCA error: {0}")]
    Vca(#[from] VcaError),
    #[error("K8s error: {0}")]
    K8s(#[from] K8sError),
    #[error("Messaging error: {0}")]
    Messaging(String),
    #[error("{0}")]
    Timeout(String),
    #[error("Operation was cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Liveness failure: {0}")]
    Liveness(String),
}

impl LcmError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<MessagingError> for LcmError {
    fn from(error: MessagingError) -> Self {
        LcmError::Messaging(error.to_string())
    }
}

impl From<ConfigurationError> for LcmError {
    fn from(error: ConfigurationError) -> Self {
        LcmError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for LcmError {
    fn from(error: serde_json::Error) -> Self {
        LcmError::Internal(format!("JSON serialization error: {error}"))
    }
}

pub type LcmResult<T> = anyhow::Result<T, LcmError>;

/// Document store failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbError {
    #[error("{collection} '{filter}' not found")]
    NotFound { collection: String, filter: String },
    #[error("{operation} - {reason}")]
    Backend { operation: String, reason: String },
    #[error("cannot decrypt field: {0}")]
    Decrypt(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    pub fn not_found(collection: impl Into<String>, filter: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            filter: filter.into(),
        }
    }

    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::backend("sqlx", err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Resource orchestrator call failure with its HTTP-like status code
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RoError {
    pub http_code: u16,
    pub message: String,
}

impl RoError {
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;

    pub fn new(http_code: u16, message: impl Into<String>) -> Self {
        Self {
            http_code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.http_code == Self::NOT_FOUND
    }

    pub fn is_conflict(&self) -> bool {
        self.http_code == Self::CONFLICT
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VcaError {
    #[error("{0}")]
    Rpc(String),
    #[error("application '{0}' not found")]
    UnknownApplication(String),
    #[error("primitive failed: {0}")]
    PrimitiveFailed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct K8sError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_has_fixed_message() {
        assert_eq!(LcmError::Cancelled.to_string(), "Operation was cancelled");
    }

    #[test]
    fn ro_error_codes() {
        assert!(RoError::not_found("gone").is_not_found());
        assert!(RoError::new(409, "busy").is_conflict());
        assert!(!RoError::new(500, "boom").is_conflict());
    }

    #[test]
    fn domain_error_is_verbatim() {
        let err = LcmError::domain("VIM 'v1' is not in ENABLED state");
        assert_eq!(err.to_string(), "VIM 'v1' is not in ENABLED state");
    }
}
