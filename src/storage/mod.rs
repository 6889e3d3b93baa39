//! Storage engine capability: a key/value table with conditional batch
//! writes, point reads and paginated range queries.
//!
//! The engine is an external collaborator. Everything the gateway needs
//! from it is expressed by [`StorageClient`], so tests can substitute a
//! double and deployments can choose between [`InMemoryStorage`] and
//! [`PostgresStorage`].

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;

/// Maximum number of write requests accepted by a single
/// [`StorageClient::batch_write`] call.
pub const MAX_BATCH_SIZE: usize = 25;

/// Attribute map stored for every item.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Primary key of a stored item: partition plus sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    /// Partition the item lives in (e.g. `event#strava`).
    pub partition: String,
    /// Sort key, unique within the partition.
    pub sort: String,
}

impl ItemKey {
    /// Creates a key from its two components.
    #[must_use]
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}

/// Condition attached to a put.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteCondition {
    /// Overwrite whatever is stored under the key.
    #[default]
    Always,
    /// Only write when nothing is stored under the key. An existing item
    /// leaves the request skipped, which still counts as processed.
    IfAbsent,
}

/// One record in the storage engine's wire representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Destination key.
    pub key: ItemKey,
    /// Marshaled record body.
    pub attributes: Attributes,
    /// Put condition.
    pub condition: WriteCondition,
}

/// Outcome of one `batch_write` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteOutput {
    /// Requests the engine did not commit (e.g. throttled). Must be
    /// resubmitted by the caller.
    pub unprocessed: Vec<WriteRequest>,
    /// Keys of `IfAbsent` requests that were skipped because the item
    /// already existed.
    pub skipped: Vec<ItemKey>,
}

/// An item as read back from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    /// Item key.
    pub key: ItemKey,
    /// Stored attributes.
    pub attributes: Attributes,
    /// Last time the item was written.
    pub updated_at: DateTime<Utc>,
}

/// One page of a partition query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    /// Items in sort-key order.
    pub items: Vec<StoredItem>,
    /// Sort key to resume after, present when more items remain.
    pub next_cursor: Option<String>,
}

/// Errors reported by the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The engine is shedding load; the request may succeed later.
    #[error("storage throttled the request")]
    Throttled,

    /// Transient transport or availability failure.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The engine refused the request outright. Retrying will not help.
    #[error("storage rejected the request: {0}")]
    Rejected(String),
}

impl StorageError {
    /// Returns `true` for errors worth retrying with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Unavailable(_))
    }
}

/// Capability interface over the key/value storage engine.
///
/// Implementations must accept at most [`MAX_BATCH_SIZE`] requests per
/// `batch_write` and may leave any subset of them unprocessed.
#[async_trait]
pub trait StorageClient: Send + Sync + fmt::Debug {
    /// Writes up to [`MAX_BATCH_SIZE`] requests to `table`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the call as a whole fails.
    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<BatchWriteOutput, StorageError>;

    /// Reads a single item.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the engine cannot serve the read.
    async fn get_item(&self, table: &str, key: &ItemKey)
    -> Result<Option<StoredItem>, StorageError>;

    /// Reads up to `limit` items from `partition` whose sort key is
    /// strictly greater than `cursor`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the engine cannot serve the query.
    async fn query(
        &self,
        table: &str,
        partition: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<QueryPage, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StorageError::Throttled.is_retryable());
        assert!(StorageError::Unavailable("timeout".to_string()).is_retryable());
        assert!(!StorageError::Rejected("bad key".to_string()).is_retryable());
    }

    #[test]
    fn item_key_display() {
        let key = ItemKey::new("event#strava", "2024-01-01T00:00:00.000Z#evt_1");
        assert_eq!(key.to_string(), "event#strava/2024-01-01T00:00:00.000Z#evt_1");
    }

    #[test]
    fn item_keys_order_by_partition_then_sort() {
        let a = ItemKey::new("a", "2");
        let b = ItemKey::new("b", "1");
        let c = ItemKey::new("a", "3");
        let mut keys = vec![b.clone(), c.clone(), a.clone()];
        keys.sort();
        assert_eq!(keys, vec![a, c, b]);
    }

    #[test]
    fn default_condition_is_always() {
        assert_eq!(WriteCondition::default(), WriteCondition::Always);
    }
}
