//! axum middleware that authenticates the raw body of signed routes.

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;

use super::signature::{SIGNATURE_HEADER, authenticate};
use crate::app_state::AppState;
use crate::error::{GatewayError, ValidationError};

/// Largest request body the gateway buffers for verification.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Verifies `x-webhook-signature` against the unparsed body before the
/// request reaches the handler.
///
/// The body is buffered once and handed on unchanged, so the handler sees
/// exactly the bytes that were signed.
///
/// # Errors
///
/// Returns [`GatewayError::Unauthorized`] when the deployment has no
/// secret or the signature is missing or wrong, and
/// [`GatewayError::InvalidRequest`] when the body is larger than
/// [`MAX_BODY_BYTES`] or cannot be read.
pub async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();
    let too_large = ValidationError::PayloadTooLarge {
        limit: MAX_BODY_BYTES,
    };
    if declared_length(&parts.headers).is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(too_large.into());
    }

    let bytes = match Bytes::from_request(Request::new(body), &()).await {
        Ok(bytes) if bytes.len() <= MAX_BODY_BYTES => bytes,
        Ok(_) => return Err(too_large.into()),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return Err(too_large.into());
        }
        Err(rejection) => {
            return Err(ValidationError::InvalidField {
                field: "body",
                reason: rejection.body_text(),
            }
            .into());
        }
    };

    let header = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if let Err(e) = authenticate(&bytes, header, state.webhook_secret.as_deref()) {
        tracing::warn!(path = %parts.uri.path(), error = %e, "signature check failed");
        return Err(e.into());
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
