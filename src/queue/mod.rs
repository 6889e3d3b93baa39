//! Durable queue capability and the in-process delivery machinery.
//!
//! The queue is an at-least-once channel: a message may be delivered more
//! than once until it is completed, and a message that keeps failing is
//! diverted to a dead-letter list after a fixed number of receives.

pub mod dispatcher;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use dispatcher::{DispatchConfig, run_dispatcher};
pub use memory::InMemoryQueue;

/// Delivery-system identifier of a message. Distinct from the identity of
/// the event the message carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a delivery-system identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivered message: an opaque wrapper around a serialized event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Delivery-system identifier.
    #[serde(rename = "messageId")]
    pub message_id: MessageId,
    /// Serialized event.
    pub body: String,
    /// How many times this message has been delivered, including this one.
    #[serde(rename = "receiveCount", default = "default_receive_count")]
    pub receive_count: u32,
}

const fn default_receive_count() -> u32 {
    1
}

/// Errors reported by the queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue could not accept the message.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The message exceeds what the queue accepts.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Body size in bytes.
        size: usize,
        /// Largest accepted body.
        max: usize,
    },
}

/// Capability interface over the durable queue's producer side.
#[async_trait]
pub trait QueueClient: Send + Sync + fmt::Debug {
    /// Enqueues `body` as a single message.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] if the queue does not accept the message.
    async fn send_message(&self, body: String) -> Result<MessageId, QueueError>;
}
