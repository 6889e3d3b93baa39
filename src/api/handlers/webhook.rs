//! Signed webhook ingress.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use super::parse_json;
use crate::api::dto::{EventAcceptedResponse, EventRequest};
use crate::app_state::AppState;
use crate::auth::require_signature;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /webhooks/events` — Accept a signed event for async processing.
///
/// # Errors
///
/// Returns [`GatewayError`] on a malformed body or when the queue refuses
/// the event. Signature failures are rejected by the route middleware.
#[utoipa::path(
    post,
    path = "/webhooks/events",
    tag = "Webhooks",
    summary = "Ingest a signed event",
    description = "Verifies `x-webhook-signature: sha256=<hex>` over the raw body, assigns the event an identity and puts it on the queue. Persistence happens asynchronously.",
    request_body = EventRequest,
    responses(
        (status = 201, description = "Event queued", body = EventAcceptedResponse),
        (status = 400, description = "Malformed JSON body", body = ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse),
        (status = 500, description = "Secret not configured or queue unavailable", body = ErrorResponse),
    )
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let request: EventRequest = parse_json(&body)?;
    let id = state.publisher.publish(request.into_event()).await?;

    Ok((
        StatusCode::CREATED,
        Json(EventAcceptedResponse {
            id: id.to_string(),
            status: "queued".to_string(),
        }),
    ))
}

/// Webhook routes, mounted at the root and guarded by the signature check.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/webhooks/events", post(receive_webhook))
        .route_layer(from_fn_with_state(state.clone(), require_signature))
}
