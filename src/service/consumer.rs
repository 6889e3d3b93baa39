//! Queue consumer with per-message failure isolation.
//!
//! [`EventConsumer::handle`] never fails as a whole. Each message is decoded
//! and appended on its own; the ones that could not be handled are listed
//! in the returned [`BatchResponse`] so only they are redelivered.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::event_log::{AppendOutcome, EventLog};
use crate::domain::InboundEvent;
use crate::queue::{MessageId, QueueMessage};
use crate::writer::WriteError;

/// Failure that prevents a batch from being examined at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    /// The batch envelope itself is not valid.
    #[error("malformed batch: {0}")]
    MalformedBatch(String),
}

/// One failed message in a [`BatchResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    /// Identifier of the message to redeliver.
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: MessageId,
}

/// Consumer reply: the messages that must be redelivered. Every message
/// not listed is acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Failed messages, in batch order.
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    /// Identifiers of the failed messages.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<MessageId> {
        self.batch_item_failures
            .iter()
            .map(|f| f.item_identifier.clone())
            .collect()
    }

    /// Returns `true` when every message succeeded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}

/// Raw batch envelope, `{"Records": [{"messageId", "body"}, ...]}`.
#[derive(Debug, Deserialize)]
struct RawBatch {
    #[serde(rename = "Records")]
    records: Vec<QueueMessage>,
}

#[derive(Debug, thiserror::Error)]
enum MessageFailure {
    #[error("body is not an event: {0}")]
    Decode(String),
    #[error("event has no id")]
    MissingId,
    #[error(transparent)]
    Persist(#[from] WriteError),
}

/// Consumes batches of queued events into the [`EventLog`].
#[derive(Debug, Clone)]
pub struct EventConsumer {
    event_log: Arc<EventLog>,
}

impl EventConsumer {
    /// Creates a consumer appending to `event_log`.
    #[must_use]
    pub fn new(event_log: Arc<EventLog>) -> Self {
        Self { event_log }
    }

    /// Handles a delivered batch and reports the messages that failed.
    ///
    /// Once `cancel` fires, every message not yet committed is reported as
    /// failed.
    pub async fn handle(
        &self,
        messages: &[QueueMessage],
        cancel: &CancellationToken,
    ) -> BatchResponse {
        let mut response = BatchResponse::default();

        for message in messages {
            match self.process(message, cancel).await {
                Ok(outcome) => {
                    tracing::debug!(message_id = %message.message_id, ?outcome, "message handled");
                }
                Err(failure) => {
                    tracing::warn!(
                        message_id = %message.message_id,
                        receive_count = message.receive_count,
                        error = %failure,
                        "message failed"
                    );
                    response.batch_item_failures.push(BatchItemFailure {
                        item_identifier: message.message_id.clone(),
                    });
                }
            }
        }

        tracing::info!(
            batch_size = messages.len(),
            failed = response.batch_item_failures.len(),
            "batch handled"
        );
        response
    }

    /// Decodes a raw batch envelope and handles it.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MalformedBatch`] if the envelope cannot be
    /// parsed. Per-message failures are reported in the response instead.
    pub async fn handle_raw(
        &self,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<BatchResponse, ConsumerError> {
        let batch: RawBatch = serde_json::from_slice(payload)
            .map_err(|e| ConsumerError::MalformedBatch(e.to_string()))?;
        Ok(self.handle(&batch.records, cancel).await)
    }

    async fn process(
        &self,
        message: &QueueMessage,
        cancel: &CancellationToken,
    ) -> Result<AppendOutcome, MessageFailure> {
        let event: InboundEvent = serde_json::from_str(&message.body)
            .map_err(|e| MessageFailure::Decode(e.to_string()))?;
        if event.id.is_none() {
            return Err(MessageFailure::MissingId);
        }
        Ok(self.event_log.append(&event, cancel).await?)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::service::event_log::partition_for;
    use crate::storage::{StorageClient, StorageError};
    use crate::test_utils::{ScriptedStorage, Step, scripted_writer};

    const TABLE: &str = "events";

    fn consumer(script: Vec<Step>) -> (EventConsumer, Arc<ScriptedStorage>) {
        let (writer, storage) = scripted_writer(script);
        let log = Arc::new(EventLog::new(writer, TABLE));
        (EventConsumer::new(log), storage)
    }

    fn message(id: &str, source: &str) -> QueueMessage {
        let mut event = InboundEvent::new("workout.completed", source, serde_json::Map::new());
        event.ensure_id();
        let Ok(body) = serde_json::to_string(&event) else {
            panic!("serialization failed");
        };
        QueueMessage {
            message_id: MessageId::new(id),
            body,
            receive_count: 1,
        }
    }

    #[tokio::test]
    async fn persist_failure_reports_only_that_message() {
        let (consumer, storage) = consumer(vec![]);
        storage.poison_partition(&partition_for("broken"));

        let a = message("A", "strava");
        let b = message("B", "broken");
        let response = consumer.handle(&[a, b], &CancellationToken::new()).await;

        assert_eq!(response.failed_ids(), vec![MessageId::new("B")]);
        let Ok(page) = storage.inner().query(TABLE, "event#strava", None, 10).await else {
            panic!("query failed");
        };
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn undecodable_body_does_not_block_siblings() {
        let (consumer, storage) = consumer(vec![]);
        let bad = QueueMessage {
            message_id: MessageId::new("bad"),
            body: "{not json".to_string(),
            receive_count: 1,
        };
        let good = message("good", "strava");

        let response = consumer.handle(&[bad, good], &CancellationToken::new()).await;

        assert_eq!(response.failed_ids(), vec![MessageId::new("bad")]);
        assert_eq!(storage.inner().len(TABLE).await, 1);
    }

    #[tokio::test]
    async fn event_without_id_is_failed() {
        let (consumer, storage) = consumer(vec![]);
        let event = InboundEvent::new("a", "b", serde_json::Map::new());
        let Ok(body) = serde_json::to_string(&event) else {
            panic!("serialization failed");
        };
        let msg = QueueMessage {
            message_id: MessageId::new("anon"),
            body,
            receive_count: 1,
        };

        let response = consumer.handle(&[msg], &CancellationToken::new()).await;

        assert_eq!(response.failed_ids(), vec![MessageId::new("anon")]);
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn redelivery_is_acknowledged_without_second_record() {
        let (consumer, storage) = consumer(vec![]);
        let first = message("m-1", "strava");
        let redelivered = QueueMessage {
            receive_count: 2,
            ..first.clone()
        };
        let cancel = CancellationToken::new();

        assert!(consumer.handle(&[first], &cancel).await.is_empty());
        assert!(consumer.handle(&[redelivered], &cancel).await.is_empty());
        assert_eq!(storage.inner().len(TABLE).await, 1);
    }

    #[tokio::test]
    async fn transient_storage_error_is_retried_inside_writer() {
        let (consumer, _storage) = consumer(vec![Step::Fail(StorageError::Unavailable(
            "reset".to_string(),
        ))]);
        let response = consumer
            .handle(&[message("m", "strava")], &CancellationToken::new())
            .await;
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn cancelled_batch_fails_every_message() {
        let (consumer, storage) = consumer(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = consumer
            .handle(&[message("x", "strava"), message("y", "strava")], &cancel)
            .await;

        assert_eq!(response.batch_item_failures.len(), 2);
        assert!(storage.inner().is_empty(TABLE).await);
    }

    #[tokio::test]
    async fn handle_raw_parses_envelope() {
        let (consumer, _storage) = consumer(vec![]);
        let good = message("r-1", "strava");
        let envelope = serde_json::json!({
            "Records": [
                { "messageId": "r-1", "body": good.body },
                { "messageId": "r-2", "body": "[]" },
            ]
        });
        let Ok(payload) = serde_json::to_vec(&envelope) else {
            panic!("serialization failed");
        };

        let Ok(response) = consumer.handle_raw(&payload, &CancellationToken::new()).await else {
            panic!("envelope rejected");
        };
        let Ok(json) = serde_json::to_value(&response) else {
            panic!("serialization failed");
        };
        assert_eq!(
            json,
            serde_json::json!({ "batchItemFailures": [{ "itemIdentifier": "r-2" }] })
        );
    }

    #[tokio::test]
    async fn malformed_envelope_is_hard_error() {
        let (consumer, _storage) = consumer(vec![]);
        let result = consumer
            .handle_raw(b"{\"records\": 1}", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ConsumerError::MalformedBatch(_))));
    }
}
