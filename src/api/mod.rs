//! REST API layer: route handlers, DTOs, middleware and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; webhook ingress and the
//! health check live at the root.

pub mod dto;
pub mod handlers;
pub mod middleware;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "lifelog-gateway", description = "Signed event ingestion and event log API"),
    paths(
        handlers::webhook::receive_webhook,
        handlers::events::create_event,
        handlers::events::list_events,
        handlers::system::health_handler,
    ),
    components(schemas(
        dto::EventRequest,
        dto::EventAcceptedResponse,
        dto::EventDto,
        dto::EventListResponse,
        dto::CursorMeta,
        handlers::system::HealthResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "Webhooks", description = "Signed asynchronous ingestion"),
        (name = "Events", description = "Synchronous append and reads"),
        (name = "System", description = "Operational endpoints"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .nest("/api/v1", handlers::routes(&state))
        .merge(handlers::webhook::routes(&state))
        .merge(handlers::system::routes());

    with_docs(router).with_state(state)
}

#[cfg(feature = "swagger-ui")]
fn with_docs(router: Router<AppState>) -> Router<AppState> {
    router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
}

#[cfg(not(feature = "swagger-ui"))]
fn with_docs(router: Router<AppState>) -> Router<AppState> {
    router.route(
        "/api-docs/openapi.json",
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    )
}
