//! Event log handlers: synchronous append and paginated read.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::parse_json;
use crate::api::dto::{
    CursorMeta, CursorParams, EventAcceptedResponse, EventDto, EventListResponse, EventRequest,
};
use crate::api::middleware::idempotency;
use crate::app_state::AppState;
use crate::auth::require_signature;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /events` — Append a signed event synchronously.
///
/// Retries carrying the same `idempotency-key` replay the first response
/// instead of appending again.
///
/// # Errors
///
/// Returns [`GatewayError`] on a malformed body or when the append does
/// not commit.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Events",
    summary = "Append an event",
    description = "Verifies the body signature and writes the event to the log before responding. Send `idempotency-key` to make retries safe.",
    request_body = EventRequest,
    params(
        ("idempotency-key" = Option<String>, Header, description = "Caller token, 1 to 255 visible ASCII characters"),
    ),
    responses(
        (status = 201, description = "Event stored", body = EventAcceptedResponse),
        (status = 400, description = "Malformed body or idempotency key", body = ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse),
        (status = 500, description = "Persistence failure", body = ErrorResponse),
        (status = 503, description = "Cancelled during shutdown", body = ErrorResponse),
    )
)]
pub async fn create_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let request: EventRequest = parse_json(&body)?;
    let mut event = request.into_event();
    event.validate()?;
    let id = event.ensure_id().clone();

    let cancel = state.shutdown.child_token();
    let outcome = state.event_log.append(&event, &cancel).await?;
    tracing::info!(event_id = %id, source = %event.source, ?outcome, "event appended");

    Ok((
        StatusCode::CREATED,
        Json(EventAcceptedResponse {
            id: id.to_string(),
            status: "stored".to_string(),
        }),
    ))
}

/// `GET /events/{source}` — List persisted events from one source.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] if the query fails.
#[utoipa::path(
    get,
    path = "/api/v1/events/{source}",
    tag = "Events",
    summary = "List events from a source",
    description = "Returns events in arrival order, one page at a time.",
    params(
        ("source" = String, Path, description = "Originating system"),
        CursorParams,
    ),
    responses(
        (status = 200, description = "One page of events", body = EventListResponse),
        (status = 500, description = "Persistence failure", body = ErrorResponse),
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(params): Query<CursorParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let params = params.clamped();
    let page = state
        .event_log
        .list(&source, params.cursor.as_deref(), params.limit)
        .await?;

    Ok(Json(EventListResponse {
        data: page.events.into_iter().map(EventDto::from).collect(),
        pagination: CursorMeta {
            limit: params.limit,
            next_cursor: page.next_cursor,
        },
    }))
}

/// Event routes. The append route runs the signature check first, then
/// the idempotency lookup.
pub fn routes(state: &AppState) -> Router<AppState> {
    let append = Router::new()
        .route("/events", post(create_event))
        .route_layer(from_fn_with_state(state.clone(), idempotency))
        .route_layer(from_fn_with_state(state.clone(), require_signature));

    Router::new()
        .route("/events/{source}", get(list_events))
        .merge(append)
}
