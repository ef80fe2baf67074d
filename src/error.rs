//! # Error Handling
//!
//! Custom error types for the HTTP surface and how they become JSON error
//! responses. Pipeline-level faults live in `services::ServiceError`; this
//! type covers the REST handlers, where actix converts any returned error
//! into a response through the `ResponseError` trait.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> everywhere
//! - Handlers return `Result<HttpResponse, AppError>`; the framework calls
//!   `error_response()` on the `Err` arm (no exceptions, no try/catch)
//!
//! ### From conversions
//! - `impl From<X> for AppError` lets `?` lift lower-level errors
//!   (serde, config, upstream service faults) into handler errors without
//!   boilerplate at each call site
//!
//! ## Error Categories:
//! - **Internal**: server-side problems (500)
//! - **BadRequest / ValidationError**: the client sent something wrong (400)
//! - **NotFound**: no such resource (404)
//! - **ConfigError**: configuration problems (500)
//! - **Upstream**: a remote AI service failed (502)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors a request handler can return.
#[derive(Debug)]
pub enum AppError {
    /// Server-side failure with no better classification
    Internal(String),

    /// The client sent invalid or malformed data
    BadRequest(String),

    /// The requested resource does not exist
    NotFound(String),

    /// Configuration file or environment problems
    ConfigError(String),

    /// Input failed a validation rule
    ValidationError(String),

    /// A remote AI service (generation, transcription, synthesis) failed
    Upstream(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream service error: {}", msg),
        }
    }
}

/// Conversion of errors into JSON HTTP responses.
///
/// Every error answers with the same body shape so clients can handle
/// faults uniformly:
/// ```json
/// {
///   "error": {
///     "type": "upstream_error",
///     "message": "upstream returned status 503: model overloaded",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::Upstream(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "upstream_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Catch-all conversion for anyhow errors bubbling out of lower layers.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed JSON in a request body is the client's fault, not ours.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Remote service faults surface as 502s on the REST diagnostics
/// endpoints; the `Display` text already carries the upstream status and
/// body where available.
impl From<crate::services::ServiceError> for AppError {
    fn from(err: crate::services::ServiceError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceError;

    #[test]
    fn test_upstream_fault_maps_to_bad_gateway() {
        let err: AppError = ServiceError::Upstream {
            status: 503,
            body: "model overloaded".to_string(),
        }
        .into();

        assert!(matches!(&err, AppError::Upstream(msg) if msg.contains("503")));
        assert_eq!(
            err.error_response().status(),
            actix_web::http::StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_validation_error_maps_to_bad_request() {
        let err = AppError::ValidationError("port cannot be 0".to_string());
        assert_eq!(
            err.error_response().status(),
            actix_web::http::StatusCode::BAD_REQUEST
        );
    }
}
