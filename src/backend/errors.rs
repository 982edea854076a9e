//! # Storage Backend Errors

use thiserror::Error;

use crate::errors::ArcdError;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised at the object-store boundary
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// Wrap an I/O error for a key
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        BackendError::Io {
            key: key.into(),
            source,
        }
    }

    /// Whether the object is simply absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::ObjectNotFound(_))
    }
}

impl From<BackendError> for ArcdError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ObjectNotFound(key) => ArcdError::not_found(key),
            BackendError::Io { key, source } => {
                ArcdError::io_error(format!("Backend I/O error on {}", key), source)
            }
            other => ArcdError::io_error(
                "Backend failure",
                std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
            ),
        }
    }
}
