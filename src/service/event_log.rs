//! Append-only log of persisted events.
//!
//! Events are keyed by partition `event#<source>` and sort key
//! `<createdAt, RFC 3339 millis>#<event id>`, so a source's events read back
//! in arrival order. Every append is an insert-only put: a redelivered
//! event that is already stored is skipped instead of written twice.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::{EventId, InboundEvent};
use crate::storage::{ItemKey, StorageError, WriteCondition};
use crate::writer::{BatchWriter, Record, WriteError};

/// Prefix of every event partition key.
pub const EVENT_PARTITION_PREFIX: &str = "event#";

/// An event as stored in the log. Unlike [`InboundEvent`], the identity is
/// mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Event identity assigned at publish time.
    pub id: EventId,
    /// Event category.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Originating system.
    pub source: String,
    /// Sender-supplied payload.
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// When the gateway accepted the event.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Converts a published event. Returns `None` if it has no identity.
    #[must_use]
    pub fn from_inbound(event: &InboundEvent) -> Option<Self> {
        Some(Self {
            id: event.id.clone()?,
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            payload: event.payload.clone(),
            created_at: event.created_at,
        })
    }
}

impl Record for StoredEvent {
    fn key(&self) -> ItemKey {
        ItemKey::new(
            partition_for(&self.source),
            format!(
                "{}#{}",
                self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                self.id
            ),
        )
    }

    fn condition(&self) -> WriteCondition {
        WriteCondition::IfAbsent
    }
}

/// Partition key holding every event from `source`.
#[must_use]
pub fn partition_for(source: &str) -> String {
    format!("{EVENT_PARTITION_PREFIX}{source}")
}

/// Result of [`EventLog::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The event was stored by this call.
    Written,
    /// An earlier delivery already stored this event.
    AlreadyPresent,
}

/// One page of [`EventLog::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPage {
    /// Events in arrival order.
    pub events: Vec<StoredEvent>,
    /// Cursor for the next page, present when more events remain.
    pub next_cursor: Option<String>,
}

/// Event log over a [`BatchWriter`].
#[derive(Debug, Clone)]
pub struct EventLog {
    writer: BatchWriter,
    table: String,
}

impl EventLog {
    /// Creates a log writing to `table` through `writer`.
    #[must_use]
    pub fn new(writer: BatchWriter, table: impl Into<String>) -> Self {
        Self {
            writer,
            table: table.into(),
        }
    }

    /// Table the log writes to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Appends a published event.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Marshal`] if the event has no identity, and the
    /// writer's error if the put does not commit.
    pub async fn append(
        &self,
        event: &InboundEvent,
        cancel: &CancellationToken,
    ) -> Result<AppendOutcome, WriteError> {
        let record = StoredEvent::from_inbound(event).ok_or_else(|| WriteError::Marshal {
            index: 0,
            reason: "event has no id".to_string(),
        })?;

        let summary = self.writer.write_one(&self.table, &record, cancel).await?;
        if summary.skipped > 0 {
            tracing::info!(event_id = %record.id, source = %record.source, "event already stored");
            Ok(AppendOutcome::AlreadyPresent)
        } else {
            tracing::debug!(event_id = %record.id, source = %record.source, "event stored");
            Ok(AppendOutcome::Written)
        }
    }

    /// Reads up to `limit` events from `source`, resuming after `cursor`.
    ///
    /// Items that no longer decode as events are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns the [`StorageError`] if the query fails.
    pub async fn list(
        &self,
        source: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<EventPage, StorageError> {
        let page = self
            .writer
            .storage()
            .query(&self.table, &partition_for(source), cursor, limit)
            .await?;

        let events = page
            .items
            .into_iter()
            .filter_map(|item| {
                match serde_json::from_value(serde_json::Value::Object(item.attributes)) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::warn!(key = %item.key, error = %e, "skipping undecodable event");
                        None
                    }
                }
            })
            .collect();

        Ok(EventPage {
            events,
            next_cursor: page.next_cursor,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::test_utils::{Step, scripted_writer};

    const TABLE: &str = "events";

    fn published(source: &str) -> InboundEvent {
        let mut event = InboundEvent::new("workout.completed", source, serde_json::Map::new());
        event.ensure_id();
        event
    }

    #[test]
    fn key_orders_by_created_at() {
        let Some(record) = StoredEvent::from_inbound(&published("strava")) else {
            panic!("published event has an id");
        };
        let key = record.key();
        assert_eq!(key.partition, "event#strava");
        assert!(key.sort.ends_with(&format!("#{}", record.id)));
        assert!(key.sort.contains('T'));
        assert_eq!(record.condition(), WriteCondition::IfAbsent);
    }

    #[test]
    fn unpublished_event_has_no_record() {
        let event = InboundEvent::new("a", "b", serde_json::Map::new());
        assert!(StoredEvent::from_inbound(&event).is_none());
    }

    #[tokio::test]
    async fn append_then_redeliver_is_already_present() {
        let (writer, storage) = scripted_writer(vec![]);
        let log = EventLog::new(writer, TABLE);
        let event = published("strava");
        let cancel = CancellationToken::new();

        assert_eq!(log.append(&event, &cancel).await, Ok(AppendOutcome::Written));
        assert_eq!(
            log.append(&event, &cancel).await,
            Ok(AppendOutcome::AlreadyPresent)
        );
        assert_eq!(storage.inner().len(TABLE).await, 1);
    }

    #[tokio::test]
    async fn append_without_id_is_marshal_error() {
        let (writer, storage) = scripted_writer(vec![]);
        let log = EventLog::new(writer, TABLE);
        let event = InboundEvent::new("a", "b", serde_json::Map::new());

        let result = log.append(&event, &CancellationToken::new()).await;
        assert!(matches!(result, Err(WriteError::Marshal { .. })));
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn append_retries_throttled_write() {
        let (writer, storage) = scripted_writer(vec![Step::Fail(StorageError::Throttled)]);
        let log = EventLog::new(writer, TABLE);

        let result = log.append(&published("oura"), &CancellationToken::new()).await;
        assert_eq!(result, Ok(AppendOutcome::Written));
        assert_eq!(storage.call_sizes(), vec![1, 1]);
    }

    #[tokio::test]
    async fn list_pages_through_source() {
        let (writer, _storage) = scripted_writer(vec![]);
        let log = EventLog::new(writer, TABLE);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let Ok(_) = log.append(&published("strava"), &cancel).await else {
                panic!("append failed");
            };
        }
        let Ok(_) = log.append(&published("oura"), &cancel).await else {
            panic!("append failed");
        };

        let Ok(first) = log.list("strava", None, 2).await else {
            panic!("list failed");
        };
        assert_eq!(first.events.len(), 2);
        assert!(first.next_cursor.is_some());

        let Ok(second) = log.list("strava", first.next_cursor.as_deref(), 2).await else {
            panic!("list failed");
        };
        assert_eq!(second.events.len(), 1);
        assert!(second.next_cursor.is_none());
        assert!(second.events.iter().all(|e| e.source == "strava"));
    }
}
