//! Sink error types.

use thiserror::Error;

/// Failures reported by a [`Sink`](super::Sink) backend.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sink operations.
pub type SinkResult<T> = std::result::Result<T, SinkError>;
