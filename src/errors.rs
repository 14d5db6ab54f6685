use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::document::DocumentError;

/// Application-specific error types.
///
/// Validation failures are resolved locally and never reach the network;
/// everything else originates from a round-trip to the record store.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Malformed input or checksum failure on a tax-identifier document.
    InvalidDocument(DocumentError),
    /// Another record already owns the document.
    DuplicateConflict {
        /// Raw digits of the contested document.
        document: String,
        /// Display name of the record that owns it.
        owner: String,
    },
    /// Transient network or backend failure.
    ExternalApiError(String),
    /// The store answered 401/403. Token handling belongs to the transport.
    Unauthorized(String),
    /// A create/update was rejected by the backend. Keeps the exact payload
    /// so the form can resubmit it unchanged.
    SubmissionRejected {
        /// HTTP status returned by the store.
        status: u16,
        /// Backend-provided message, if any.
        message: String,
        /// The JSON body that was sent.
        payload: serde_json::Value,
    },
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Resource not found error.
    NotFound(String),
    /// Internal error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Whether the user should be offered a retry affordance.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::ExternalApiError(_) | AppError::SubmissionRejected { .. } => true,
            AppError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Strips context wrappers and returns the innermost error.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidDocument(e) => write!(f, "Invalid document: {}", e),
            AppError::DuplicateConflict { document, owner } => {
                write!(f, "Document {} already belongs to {}", document, owner)
            }
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::SubmissionRejected {
                status, message, ..
            } => write!(f, "Submission rejected ({}): {}", status, message),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::InvalidDocument(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "error": e.code(),
                    "message": e.guidance(),
                    "malformed": e.is_malformed(),
                }),
            ),
            AppError::DuplicateConflict { document, owner } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "duplicate_document",
                    "message": format!("Document {} already belongs to {}", document, owner),
                }),
            ),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "External service error", "retryable": true }),
                )
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" }))
            }
            AppError::SubmissionRejected {
                status,
                message,
                payload,
            } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                json!({
                    "error": message,
                    "retryable": true,
                    "payload": payload,
                }),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.as_ref().clone().into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        AppError::InvalidDocument(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}
