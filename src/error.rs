//! Gateway error types with HTTP status code mapping.
//!
//! Layer-specific errors ([`AuthError`], [`ValidationError`],
//! [`WriteError`], [`PublishError`], ...) convert into [`GatewayError`],
//! the one type handlers return. Each variant maps to an HTTP status and
//! a structured JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::service::publisher::PublishError;
use crate::storage::StorageError;
use crate::writer::WriteError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 5001,
///     "message": "unauthorized: invalid signature"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`GatewayError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Signature authentication failures. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No webhook secret is configured, so nothing can be authenticated.
    #[error("webhook secret is not configured")]
    SecretNotConfigured,

    /// The signature header is absent or not valid UTF-8.
    #[error("missing signature header")]
    MissingSignature,

    /// The signature does not match the body.
    #[error("invalid signature")]
    InvalidSignature,
}

/// Malformed input. Surfaced immediately, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The body is not valid JSON for the expected shape.
    #[error("malformed JSON body: {0}")]
    MalformedJson(String),

    /// A field is present but unusable.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The request body is larger than the gateway buffers.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Largest accepted body, in bytes.
        limit: usize,
    },
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request (or 413)    |
/// | 3000–3999 | Server          | 500 / 503                   |
/// | 5000–5999 | Authentication  | 401 Unauthorized (or 500)   |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Signature authentication failed.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),

    /// The queue did not accept the event.
    #[error("queue error: {0}")]
    Queue(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The batched writer could not commit a chunk.
    #[error("persistence error: {0}")]
    WriteFailed(WriteError),

    /// The request's deadline or cancellation stopped the operation.
    #[error("operation cancelled before completion")]
    Cancelled,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(ValidationError::MalformedJson(_)) => 1001,
            Self::InvalidRequest(ValidationError::InvalidField { .. }) => 1002,
            Self::InvalidRequest(ValidationError::PayloadTooLarge { .. }) => 1003,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) | Self::WriteFailed(_) => 3001,
            Self::Queue(_) => 3002,
            Self::Cancelled => 3003,
            Self::Unauthorized(AuthError::SecretNotConfigured) => 5000,
            Self::Unauthorized(AuthError::InvalidSignature) => 5001,
            Self::Unauthorized(AuthError::MissingSignature) => 5002,
        }
    }

    /// Returns the HTTP status code for this variant.
    ///
    /// A missing secret is a deployment fault, so it fails closed with 500
    /// rather than 401.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(ValidationError::PayloadTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(AuthError::SecretNotConfigured) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Queue(_)
            | Self::PersistenceError(_)
            | Self::WriteFailed(_)
            | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Extra context for the error body: the failed chunk's offset for
    /// writer errors, the accepted size for oversized bodies.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::WriteFailed(err) => err
                .chunk_offset()
                .map(|offset| format!("chunk_offset: {offset}")),
            Self::InvalidRequest(ValidationError::PayloadTooLarge { limit }) => {
                Some(format!("limit_bytes: {limit}"))
            }
            _ => None,
        }
    }
}

impl From<PublishError> for GatewayError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Validation(e) => Self::InvalidRequest(e),
            PublishError::Serialize(e) => Self::Internal(e),
            PublishError::Queue(e) => Self::Queue(e.to_string()),
        }
    }
}

impl From<WriteError> for GatewayError {
    fn from(err: WriteError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::WriteFailed(err)
        }
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
