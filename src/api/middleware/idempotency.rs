//! Idempotency middleware for synchronous mutations.
//!
//! A request carrying `idempotency-key` is looked up under
//! `<METHOD> <matched route>#<token>`. A live record is replayed verbatim
//! with `idempotent-replayed: true` and the handler does not run. On a miss
//! the handler runs and a 2xx response is cached for the store's TTL. If a
//! concurrent call with the same key recorded first, its response is
//! returned instead so every caller sees one canonical answer.
//! Requests without the header pass straight through.

use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::app_state::AppState;
use crate::domain::{IdempotencyKey, IdempotencyRecord};
use crate::error::{GatewayError, ValidationError};

/// Header carrying the caller's token.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Header set on replayed responses.
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

/// Largest response body that will be cached.
const MAX_CACHED_BODY_BYTES: usize = 256 * 1024;

/// Wraps a mutating route with idempotency-key handling.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for a malformed key and
/// [`GatewayError::PersistenceError`] if the store cannot be read, in which
/// case the mutation is not attempted.
pub async fn idempotency(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let Some(raw) = request.headers().get(IDEMPOTENCY_HEADER) else {
        return Ok(next.run(request).await);
    };
    let token = raw.to_str().map_err(|_| ValidationError::InvalidField {
        field: "idempotency-key",
        reason: "must be visible ASCII".to_string(),
    })?;
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);
    let key = IdempotencyKey::scoped(request.method().as_str(), route, token)?;

    if let Some(record) = state.idempotency.get(&key).await? {
        tracing::info!(%key, status = record.status_code, "replaying cached response");
        return Ok(replay(&record));
    }

    let response = next.run(request).await;
    if !response.status().is_success() {
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_CACHED_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::Internal(format!("failed to buffer response: {e}")))?;

    match std::str::from_utf8(&bytes) {
        Ok(text) => {
            let cancel = state.shutdown.child_token();
            match state
                .idempotency
                .put(
                    &key,
                    parts.status.as_u16(),
                    text.to_string(),
                    state.idempotency.default_ttl(),
                    &cancel,
                )
                .await
            {
                Ok(canonical)
                    if canonical.status_code != parts.status.as_u16() || canonical.body != text =>
                {
                    tracing::info!(%key, "concurrent call recorded first; replaying its response");
                    return Ok(replay(&canonical));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(%key, error = %e, "failed to store idempotency record"),
            }
        }
        Err(_) => tracing::warn!(%key, "response body is not UTF-8; not cached"),
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

fn replay(record: &IdempotencyRecord) -> Response {
    let status = StatusCode::from_u16(record.status_code).unwrap_or(StatusCode::OK);
    let mut response = (status, record.body.clone()).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    response
}
