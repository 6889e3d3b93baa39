//! Route middleware.

pub mod idempotency;

pub use idempotency::{IDEMPOTENCY_HEADER, REPLAYED_HEADER, idempotency};
