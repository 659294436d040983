//! Ingestion error taxonomy.

use crate::sink::SinkError;
use thiserror::Error;

/// Everything that can end a unit of ingestion work.
///
/// None of these are retried. Each one terminates exactly the connection or
/// request it happened in.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The peer closed the stream normally. Not a failure.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended on a transport error rather than a clean close.
    #[error("abnormal disconnect: {0}")]
    AbnormalDisconnect(String),

    /// The upload body ended before it was fully received.
    #[error("incomplete upload: {0}")]
    IncompleteUpload(String),

    /// The upload body exceeded the configured size cap.
    #[error("upload exceeds the {limit} byte limit")]
    UploadTooLarge { limit: usize },

    #[error("sink write failed: {0}")]
    SinkWrite(#[source] SinkError),

    #[error("sink read failed: {0}")]
    SinkRead(#[source] SinkError),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl IngestError {
    /// Machine-readable error code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::ConnectionClosed | IngestError::AbnormalDisconnect(_) => "connection_error",
            IngestError::IncompleteUpload(_) => "incomplete_upload",
            IngestError::UploadTooLarge { .. } => "upload_too_large",
            IngestError::SinkWrite(_) => "sink_write_error",
            IngestError::SinkRead(SinkError::NotFound(_) | SinkError::InvalidName(_)) => "not_found",
            IngestError::SinkRead(_) => "sink_read_error",
            IngestError::InvalidConfiguration(_) => "invalid_configuration",
        }
    }

    /// Whether this marks a normal end of a stream.
    pub fn is_normal_close(&self) -> bool {
        matches!(self, IngestError::ConnectionClosed)
    }
}
