//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::finik::{FinikError, SigningError};
use crate::repositories::RepositoryError;

/// Application-wide error type.
///
/// This enum represents all possible errors that can occur in the application.
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Configuration Errors**: Missing processor credentials or signing key
/// - **Validation Errors**: Invalid payment-creation input
/// - **Authentication Errors**: Bad webhook signature or bearer token
/// - **Processor Errors**: The payment processor refused or could not be reached
/// - **Database Errors**: Any storage failure
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Processor credentials or the signing key are missing or unusable.
    ///
    /// Returns HTTP 500. Retrying will not help until an operator fixes the environment.
    #[error("Payment configuration error: {0}")]
    Configuration(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    Validation(String),

    /// Webhook signature is missing or does not verify.
    ///
    /// Returns HTTP 401 Unauthorized. Nothing has been written at this point.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Webhook body is not a JSON object or carries no transaction id.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid webhook payload: {0}")]
    MalformedPayload(String),

    /// The payment processor rejected the request or was unreachable.
    ///
    /// `status` is the processor's HTTP status when it answered.
    #[error("Payment processor error: {message}")]
    Processor { status: Option<u16>, message: String },

    /// Bearer token missing, expired, or not signed with our secret.
    #[error("Unauthorized")]
    Unauthorized,

    /// Transaction does not exist or is not owned by the caller.
    #[error("Transaction not found")]
    TransactionNotFound,

    /// Unexpected failure outside the database (e.g., password hashing).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::Conflict => {
                AppError::Validation("Record already exists".to_string())
            }
            RepositoryError::Hashing(msg) => AppError::Internal(msg),
        }
    }
}

impl From<SigningError> for AppError {
    fn from(err: SigningError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<FinikError> for AppError {
    fn from(err: FinikError) -> Self {
        match err {
            FinikError::Validation(msg) => AppError::Validation(msg),
            FinikError::Configuration(msg) => AppError::Configuration(msg),
            FinikError::Signing(e) => e.into(),
            FinikError::Rejected { status, message } => AppError::Processor {
                status: Some(status),
                message,
            },
            FinikError::Transport(e) => AppError::Processor {
                status: None,
                message: e.to_string(),
            },
            FinikError::InvalidResponse(message) => AppError::Processor {
                status: None,
                message,
            },
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `Configuration` → 500 Internal Server Error
/// - `Validation`, `MalformedPayload` → 400 Bad Request
/// - `InvalidSignature`, `Unauthorized` → 401 Unauthorized
/// - `Processor` → 400 when the processor answered 4xx, otherwise 502 Bad Gateway
/// - `TransactionNotFound` → 404 Not Found
/// - `Database`, `Internal` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Configuration(ref msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                msg.clone(),
            ),
            AppError::Validation(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::MalformedPayload(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_payload", msg.clone())
            }
            AppError::Processor { status, ref message } => {
                let http_status = match status {
                    Some(s) if (400..500).contains(&s) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (http_status, "processor_error", message.clone())
            }
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string())
            }
            AppError::TransactionNotFound => (
                StatusCode::NOT_FOUND,
                "transaction_not_found",
                self.to_string(),
            ),
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
