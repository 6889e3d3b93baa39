//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::service::{EventLog, EventPublisher, IdempotencyStore};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Publisher for webhook events.
    pub publisher: Arc<EventPublisher>,
    /// Event log for synchronous appends and reads.
    pub event_log: Arc<EventLog>,
    /// Cached responses of idempotent mutations.
    pub idempotency: Arc<IdempotencyStore>,
    /// Webhook signing secret. `None` rejects every signed request.
    pub webhook_secret: Option<Arc<[u8]>>,
    /// Cancelled on shutdown; requests derive child tokens from it.
    pub shutdown: CancellationToken,
}
