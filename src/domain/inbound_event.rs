//! Externally originated events.
//!
//! An [`InboundEvent`] is created from a webhook body, given an identity
//! by the publisher, serialized onto the queue and finally appended to the
//! event log. Events are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventId;
use crate::error::ValidationError;

/// Longest accepted `type` or `source` value.
pub const MAX_NAME_LEN: usize = 64;

/// An inbound event as carried on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Identity assigned at publish time. `None` until published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,
    /// Event category (e.g. `workout.completed`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Originating system (e.g. `strava`).
    pub source: String,
    /// Arbitrary JSON object supplied by the sender.
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// When the gateway accepted the event.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Creates an event without identity, stamped with the current time.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            source: source.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Checks that `type` and `source` are usable as storage key parts.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidField`] naming the offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("type", &self.event_type)?;
        validate_name("source", &self.source)
    }

    /// Returns the identity, assigning a fresh one if none exists.
    pub fn ensure_id(&mut self) -> &EventId {
        self.id.get_or_insert_with(EventId::new)
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::InvalidField {
            field,
            reason: format!("must be at most {MAX_NAME_LEN} characters"),
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ValidationError::InvalidField {
            field,
            reason: "may only contain ASCII letters, digits, '_', '-' and '.'".to_string(),
        });
    }
    Ok(())
}
