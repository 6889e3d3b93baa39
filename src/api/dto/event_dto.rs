//! Event DTOs for ingestion and listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common_dto::CursorMeta;
use crate::domain::InboundEvent;
use crate::service::StoredEvent;

/// Request body for `POST /webhooks/events` and `POST /api/v1/events`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EventRequest {
    /// Event category, e.g. `workout.completed`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Originating system, e.g. `strava`.
    pub source: String,
    /// Arbitrary JSON object.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl EventRequest {
    /// Converts the request into an unpublished event stamped now.
    #[must_use]
    pub fn into_event(self) -> InboundEvent {
        InboundEvent::new(self.event_type, self.source, self.payload)
    }
}

/// Response body for event ingestion (201 Created).
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventAcceptedResponse {
    /// Assigned event identity.
    pub id: String,
    /// `queued` for webhooks, `stored` for synchronous appends.
    pub status: String,
}

/// A persisted event.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventDto {
    /// Event identity.
    pub id: String,
    /// Event category.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Originating system.
    pub source: String,
    /// Sender-supplied payload.
    #[schema(value_type = Object)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// When the gateway accepted the event.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<StoredEvent> for EventDto {
    fn from(event: StoredEvent) -> Self {
        Self {
            id: event.id.to_string(),
            event_type: event.event_type,
            source: event.source,
            payload: event.payload,
            created_at: event.created_at,
        }
    }
}

/// Paginated list response for `GET /api/v1/events/{source}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventListResponse {
    /// Events in arrival order.
    pub data: Vec<EventDto>,
    /// Pagination metadata.
    pub pagination: CursorMeta,
}
