//! In-process at-least-once queue with a dead-letter path.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{MessageId, QueueClient, QueueError, QueueMessage};

/// Largest message body accepted by [`InMemoryQueue`].
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<QueueMessage>,
    in_flight: HashMap<MessageId, QueueMessage>,
    dead_letters: Vec<QueueMessage>,
}

/// Queue held in memory.
///
/// [`InMemoryQueue::receive`] leases messages; each leased message must be
/// either completed (removed for good) or released (made visible again).
/// A released message that has already been received `max_receive_count`
/// times goes to the dead-letter list instead.
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    max_receive_count: u32,
}

impl InMemoryQueue {
    /// Creates an empty queue that dead-letters a message after
    /// `max_receive_count` failed deliveries.
    #[must_use]
    pub fn new(max_receive_count: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_receive_count: max_receive_count.max(1),
        }
    }

    /// Leases up to `max` visible messages, bumping their receive count.
    pub async fn receive(&self, max: usize) -> Vec<QueueMessage> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let take = max.min(state.ready.len());
        let leased: Vec<QueueMessage> = state.ready.drain(..take).collect();
        let mut batch = Vec::with_capacity(take);
        for mut message in leased {
            message.receive_count += 1;
            state
                .in_flight
                .insert(message.message_id.clone(), message.clone());
            batch.push(message);
        }
        batch
    }

    /// Removes leased messages for good.
    pub async fn complete(&self, ids: &[MessageId]) {
        let mut state = self.state.lock().await;
        for id in ids {
            state.in_flight.remove(id);
        }
    }

    /// Returns leased messages to the queue, or dead-letters those that
    /// have used up their receives.
    pub async fn release(&self, ids: &[MessageId]) {
        let mut state = self.state.lock().await;
        for id in ids {
            let Some(message) = state.in_flight.remove(id) else {
                continue;
            };
            if message.receive_count >= self.max_receive_count {
                tracing::warn!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    "message moved to dead-letter list"
                );
                state.dead_letters.push(message);
            } else {
                state.ready.push_back(message);
            }
        }
    }

    /// Returns leased messages to the front of the queue without counting
    /// the delivery. Used when processing was interrupted rather than
    /// failed.
    pub async fn requeue(&self, ids: &[MessageId]) {
        let mut state = self.state.lock().await;
        for id in ids.iter().rev() {
            let Some(mut message) = state.in_flight.remove(id) else {
                continue;
            };
            message.receive_count = message.receive_count.saturating_sub(1);
            state.ready.push_front(message);
        }
    }

    /// Messages waiting to be received.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Messages leased but neither completed nor released.
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Snapshot of the dead-letter list.
    pub async fn dead_letters(&self) -> Vec<QueueMessage> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn send_message(&self, body: String) -> Result<MessageId, QueueError> {
        if body.len() > MAX_MESSAGE_BYTES {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max: MAX_MESSAGE_BYTES,
            });
        }
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let message_id = MessageId::new(format!("msg-{:08}", state.next_id));
        state.ready.push_back(QueueMessage {
            message_id: message_id.clone(),
            body,
            receive_count: 0,
        });
        Ok(message_id)
    }
}
