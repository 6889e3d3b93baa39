//! Event publisher: assigns identity and hands events to the queue.

use std::sync::Arc;

use crate::domain::{EventId, InboundEvent};
use crate::error::ValidationError;
use crate::queue::{QueueClient, QueueError};

/// Errors returned by [`EventPublisher::publish`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The event failed validation and was not sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialize(String),

    /// The queue refused the message.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Publishes inbound events onto the durable queue.
///
/// Success means the queue accepted the message; persistence happens later
/// on the consumer side.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    queue: Arc<dyn QueueClient>,
}

impl EventPublisher {
    /// Creates a publisher sending to `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn QueueClient>) -> Self {
        Self { queue }
    }

    /// Validates `event`, assigns it an identity if it has none, and sends
    /// it as a single message.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Validation`] for an unusable event and
    /// [`PublishError::Queue`] when the queue does not accept it.
    pub async fn publish(&self, mut event: InboundEvent) -> Result<EventId, PublishError> {
        event.validate()?;
        let id = event.ensure_id().clone();
        let body = serde_json::to_string(&event).map_err(|e| PublishError::Serialize(e.to_string()))?;

        match self.queue.send_message(body).await {
            Ok(message_id) => {
                tracing::info!(
                    event_id = %id,
                    %message_id,
                    event_type = %event.event_type,
                    source = %event.source,
                    "event queued"
                );
                Ok(id)
            }
            Err(e) => {
                tracing::error!(event_id = %id, error = %e, "failed to enqueue event");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::event_id::EVENT_ID_PREFIX;
    use crate::test_utils::RecordingQueue;

    fn event() -> InboundEvent {
        InboundEvent::new("sleep.logged", "oura", serde_json::Map::new())
    }

    #[tokio::test]
    async fn publish_assigns_prefixed_id_and_sends_once() {
        let queue = Arc::new(RecordingQueue::new());
        let publisher = EventPublisher::new(Arc::clone(&queue) as Arc<dyn QueueClient>);

        let Ok(id) = publisher.publish(event()).await else {
            panic!("publish failed");
        };
        assert!(id.as_str().starts_with(EVENT_ID_PREFIX));

        let sent = queue.sent();
        assert_eq!(sent.len(), 1);
        let Some(body) = sent.first() else {
            panic!("nothing sent");
        };
        let Ok(decoded) = serde_json::from_str::<InboundEvent>(body) else {
            panic!("body is not an event");
        };
        assert_eq!(decoded.id, Some(id));
        assert_eq!(decoded.source, "oura");
    }

    #[tokio::test]
    async fn existing_id_is_kept() {
        let queue = Arc::new(RecordingQueue::new());
        let publisher = EventPublisher::new(Arc::clone(&queue) as Arc<dyn QueueClient>);
        let mut e = event();
        let original = e.ensure_id().clone();

        assert_eq!(publisher.publish(e).await, Ok(original));
    }

    #[tokio::test]
    async fn invalid_event_is_not_sent() {
        let queue = Arc::new(RecordingQueue::new());
        let publisher = EventPublisher::new(Arc::clone(&queue) as Arc<dyn QueueClient>);
        let mut e = event();
        e.source = String::new();

        let result = publisher.publish(e).await;
        assert!(matches!(result, Err(PublishError::Validation(_))));
        assert!(queue.sent().is_empty());
    }

    #[tokio::test]
    async fn queue_refusal_is_surfaced() {
        let publisher = EventPublisher::new(Arc::new(RecordingQueue::refusing()));
        let result = publisher.publish(event()).await;
        assert!(matches!(result, Err(PublishError::Queue(_))));
    }
}
