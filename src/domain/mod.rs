//! Domain layer: event identity, inbound events and idempotency records.

pub mod event_id;
pub mod idempotency;
pub mod inbound_event;

pub use event_id::EventId;
pub use idempotency::{IdempotencyKey, IdempotencyRecord};
pub use inbound_event::InboundEvent;
