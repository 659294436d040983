//! # Error Handling
//!
//! This module defines the HTTP-facing error type and how it is converted to
//! responses. Domain errors ([`IngestError`], and the [`SinkError`] it wraps)
//! flow into [`AppError`] with `?` and get mapped to a status code here, in one
//! place.
//!
//! ## Key Rust Concepts for Error Handling:
//! - **thiserror**: derives `Display` and `std::error::Error` from the `#[error]` attributes
//! - **`#[from]`**: generates the `From` impl so `?` converts automatically
//! - **ResponseError trait**: actix-web calls it to turn an error into a response
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "upload_too_large",
//!     "message": "upload exceeds the 1048576 byte limit",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! [`SinkError`]: crate::sink::SinkError

use crate::ingest::IngestError;
use crate::sink::SinkError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Client sent invalid or malformed data (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// User input failed validation rules (400)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Ingestion failures, mapped per variant.
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::ValidationError(_) => "validation_error",
            AppError::Ingest(err) => err.code(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Ingest(err) => match err {
                IngestError::InvalidConfiguration(_) | IngestError::IncompleteUpload(_) => {
                    StatusCode::BAD_REQUEST
                }
                IngestError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                IngestError::SinkRead(SinkError::NotFound(_))
                | IngestError::SinkRead(SinkError::InvalidName(_)) => StatusCode::NOT_FOUND,
                IngestError::SinkRead(_)
                | IngestError::SinkWrite(_)
                | IngestError::ConnectionClosed
                | IngestError::AbnormalDisconnect(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// JSON parsing errors are almost always the client's fault, hence 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
