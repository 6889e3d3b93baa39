//! Service layer: the write path's business logic.
//!
//! [`EventPublisher`] puts accepted webhooks on the queue, [`EventConsumer`]
//! drains the queue into the [`EventLog`], and [`IdempotencyStore`] guards
//! synchronous mutations against replays.

pub mod consumer;
pub mod event_log;
pub mod idempotency;
pub mod publisher;

pub use consumer::{BatchItemFailure, BatchResponse, ConsumerError, EventConsumer};
pub use event_log::{AppendOutcome, EventLog, EventPage, StoredEvent};
pub use idempotency::IdempotencyStore;
pub use publisher::{EventPublisher, PublishError};
