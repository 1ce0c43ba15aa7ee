//! # Error Handling
//!
//! This module defines the request error taxonomy and how each error is
//! converted to an HTTP response.
//!
//! ## Error Categories:
//! - **Input validation** (400/413): the request did not carry a usable upload
//! - **Processing** (500): the upload could not be decoded, or a feature
//!   extractor failed
//!
//! Every error response has the same body shape:
//! ```json
//! { "error": "Could not process file: unsupported format" }
//! ```
//! The pipeline is all-or-nothing, so an error response never carries any
//! feature values.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the service.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Decode(format!("{:#}", err)));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// The request carried no file part at all
    MissingUpload,

    /// A file part was present but its filename or content was empty
    EmptyFilename,

    /// The upload exceeded the configured size limit (bytes)
    PayloadTooLarge(usize),

    /// Malformed multipart payload
    BadRequest(String),

    /// The decoder rejected the upload (holds the underlying cause)
    Decode(String),

    /// A feature extractor failed (holds the underlying cause)
    FeatureExtraction(String),

    /// Anything else on the server side (spool I/O, blocking pool failures)
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MissingUpload => write!(f, "No file uploaded"),
            AppError::EmptyFilename => write!(f, "No selected file"),
            AppError::PayloadTooLarge(limit) => {
                write!(f, "Upload exceeds the {} byte limit", limit)
            }
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Decode(cause) => write!(f, "Could not process file: {}", cause),
            AppError::FeatureExtraction(cause) => write!(f, "Feature extraction failed: {}", cause),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - MissingUpload/EmptyFilename/BadRequest → 400 (Bad Request)
/// - PayloadTooLarge → 413 (Payload Too Large)
/// - Decode/FeatureExtraction/Internal → 500 (Internal Server Error)
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingUpload | AppError::EmptyFilename | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Decode(_) | AppError::FeatureExtraction(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string()
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// Errors that reach a handler without being classified by a pipeline stage
/// are server-side problems, so they become `Internal`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
