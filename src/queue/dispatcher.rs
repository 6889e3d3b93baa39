//! Delivery loop that feeds queued messages to the consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{InMemoryQueue, MessageId, QueueMessage};
use crate::service::{BatchResponse, EventConsumer};

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Largest batch handed to the consumer at once.
    pub batch_size: usize,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Receives batches from `queue` until `cancel` fires.
///
/// Messages the consumer reports as failed are released for redelivery
/// (and eventually dead-lettered); all others are completed.
pub async fn run_dispatcher(
    queue: Arc<InMemoryQueue>,
    consumer: Arc<EventConsumer>,
    config: DispatchConfig,
    cancel: CancellationToken,
) {
    tracing::info!(batch_size = config.batch_size, "dispatcher started");

    while !cancel.is_cancelled() {
        let batch = queue.receive(config.batch_size.max(1)).await;
        if batch.is_empty() {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(config.poll_interval) => continue,
            }
        }

        let response = consumer.handle(&batch, &cancel).await;
        settle(&queue, batch, &response, &cancel).await;
    }

    tracing::info!("dispatcher stopped");
}

/// Completes the messages that succeeded and hands back the rest.
///
/// Failures seen after `cancel` fired are requeued without counting the
/// receive, so shutdown never pushes a message toward the dead-letter list.
async fn settle(
    queue: &InMemoryQueue,
    batch: Vec<QueueMessage>,
    response: &BatchResponse,
    cancel: &CancellationToken,
) {
    let failed = response.failed_ids();
    let succeeded: Vec<MessageId> = batch
        .into_iter()
        .map(|m| m.message_id)
        .filter(|id| !failed.contains(id))
        .collect();

    queue.complete(&succeeded).await;
    if cancel.is_cancelled() {
        if !failed.is_empty() {
            tracing::info!(count = failed.len(), "requeueing interrupted messages");
        }
        queue.requeue(&failed).await;
    } else {
        queue.release(&failed).await;
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::InboundEvent;
    use crate::queue::QueueClient;
    use crate::service::EventLog;
    use crate::service::event_log::partition_for;
    use crate::test_utils::{ScriptedStorage, scripted_writer};

    const TABLE: &str = "events";

    fn setup(max_receive_count: u32) -> (Arc<InMemoryQueue>, Arc<EventConsumer>, Arc<ScriptedStorage>) {
        let (writer, storage) = scripted_writer(vec![]);
        let log = Arc::new(EventLog::new(writer, TABLE));
        (
            Arc::new(InMemoryQueue::new(max_receive_count)),
            Arc::new(EventConsumer::new(log)),
            storage,
        )
    }

    async fn enqueue(queue: &InMemoryQueue, source: &str) {
        let mut event = InboundEvent::new("step.count", source, serde_json::Map::new());
        event.ensure_id();
        let Ok(body) = serde_json::to_string(&event) else {
            panic!("serialization failed");
        };
        let Ok(_) = queue.send_message(body).await else {
            panic!("send failed");
        };
    }

    fn fast() -> DispatchConfig {
        DispatchConfig {
            batch_size: 10,
            poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn drains_queue_and_dead_letters_poison() {
        let (queue, consumer, storage) = setup(3);
        storage.poison_partition(&partition_for("broken"));
        enqueue(&queue, "strava").await;
        enqueue(&queue, "broken").await;
        enqueue(&queue, "oura").await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_dispatcher(
            Arc::clone(&queue),
            consumer,
            fast(),
            cancel.clone(),
        ));

        for _ in 0..200 {
            if queue.dead_letters().await.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        let Ok(()) = handle.await else {
            panic!("dispatcher panicked");
        };

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert!(dead.iter().all(|m| m.receive_count == 3));
        assert_eq!(queue.ready_len().await, 0);
        assert_eq!(queue.in_flight_len().await, 0);
        assert_eq!(storage.inner().len(TABLE).await, 2);
    }

    #[tokio::test]
    async fn stops_when_cancelled_while_idle() {
        let (queue, consumer, _storage) = setup(5);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_dispatcher(queue, consumer, fast(), cancel.clone()));

        cancel.cancel();
        let Ok(Ok(())) = tokio::time::timeout(Duration::from_secs(1), handle).await else {
            panic!("dispatcher did not stop");
        };
    }

    #[tokio::test]
    async fn interrupted_batch_is_requeued_without_a_receive() {
        let (queue, consumer, _storage) = setup(1);
        enqueue(&queue, "strava").await;

        let batch = queue.receive(10).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = consumer.handle(&batch, &cancel).await;
        assert_eq!(response.failed_ids().len(), 1);

        settle(&queue, batch, &response, &cancel).await;

        assert!(queue.dead_letters().await.is_empty());
        assert_eq!(queue.in_flight_len().await, 0);
        let again = queue.receive(10).await;
        assert_eq!(again.len(), 1);
        assert!(again.iter().all(|m| m.receive_count == 1));
    }
}
