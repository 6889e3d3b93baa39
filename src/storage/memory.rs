//! In-process storage engine.
//!
//! [`InMemoryStorage`] keeps every table in a `BTreeMap` keyed by
//! [`ItemKey`], behind a single [`tokio::sync::RwLock`]. Batch writes are
//! applied atomically and never leave items unprocessed.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    BatchWriteOutput, ItemKey, MAX_BATCH_SIZE, QueryPage, StorageClient, StorageError, StoredItem,
    WriteCondition, WriteRequest,
};

type Table = BTreeMap<ItemKey, StoredItem>;

/// Storage engine held entirely in memory.
///
/// Used for local runs, dry-run imports and tests.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of items stored in `table`.
    pub async fn len(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, BTreeMap::len)
    }

    /// Returns `true` if `table` holds no items.
    pub async fn is_empty(&self, table: &str) -> bool {
        self.len(table).await == 0
    }
}

#[async_trait]
impl StorageClient for InMemoryStorage {
    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<BatchWriteOutput, StorageError> {
        if requests.len() > MAX_BATCH_SIZE {
            return Err(StorageError::Rejected(format!(
                "batch of {} exceeds limit of {MAX_BATCH_SIZE}",
                requests.len()
            )));
        }

        let mut tables = self.tables.write().await;
        let items = tables.entry(table.to_string()).or_default();
        let now = Utc::now();
        let mut output = BatchWriteOutput::default();

        for request in requests {
            if request.condition == WriteCondition::IfAbsent && items.contains_key(&request.key) {
                output.skipped.push(request.key);
                continue;
            }
            items.insert(
                request.key.clone(),
                StoredItem {
                    key: request.key,
                    attributes: request.attributes,
                    updated_at: now,
                },
            );
        }

        Ok(output)
    }

    async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
    ) -> Result<Option<StoredItem>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|items| items.get(key)).cloned())
    }

    async fn query(
        &self,
        table: &str,
        partition: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<QueryPage, StorageError> {
        let tables = self.tables.read().await;
        let Some(items) = tables.get(table) else {
            return Ok(QueryPage::default());
        };

        let lower = match cursor {
            Some(after) => Bound::Excluded(ItemKey::new(partition, after)),
            None => Bound::Included(ItemKey::new(partition, "")),
        };

        let mut page: Vec<StoredItem> = items
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.partition == partition)
            .take(limit.saturating_add(1))
            .map(|(_, item)| item.clone())
            .collect();

        let next_cursor = if page.len() > limit {
            page.truncate(limit);
            page.last().map(|item| item.key.sort.clone())
        } else {
            None
        };

        Ok(QueryPage {
            items: page,
            next_cursor,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::Attributes;

    fn put(partition: &str, sort: &str, condition: WriteCondition) -> WriteRequest {
        let mut attributes = Attributes::new();
        attributes.insert("sort".to_string(), serde_json::json!(sort));
        WriteRequest {
            key: ItemKey::new(partition, sort),
            attributes,
            condition,
        }
    }

    #[tokio::test]
    async fn batch_write_then_get() {
        let storage = InMemoryStorage::new();
        let result = storage
            .batch_write("t", vec![put("p", "1", WriteCondition::Always)])
            .await;
        let Ok(output) = result else {
            panic!("write failed");
        };
        assert!(output.unprocessed.is_empty());

        let Ok(Some(item)) = storage.get_item("t", &ItemKey::new("p", "1")).await else {
            panic!("item missing");
        };
        assert_eq!(item.attributes.get("sort"), Some(&serde_json::json!("1")));
    }

    #[tokio::test]
    async fn rejects_oversized_batch() {
        let storage = InMemoryStorage::new();
        let requests = (0..=MAX_BATCH_SIZE)
            .map(|i| put("p", &i.to_string(), WriteCondition::Always))
            .collect();
        let result = storage.batch_write("t", requests).await;
        assert!(matches!(result, Err(StorageError::Rejected(_))));
        assert!(storage.is_empty("t").await);
    }

    #[tokio::test]
    async fn if_absent_skips_existing_item() {
        let storage = InMemoryStorage::new();
        let _ = storage
            .batch_write("t", vec![put("p", "1", WriteCondition::IfAbsent)])
            .await;
        let Ok(output) = storage
            .batch_write("t", vec![put("p", "1", WriteCondition::IfAbsent)])
            .await
        else {
            panic!("write failed");
        };
        assert_eq!(output.skipped, vec![ItemKey::new("p", "1")]);
        assert_eq!(storage.len("t").await, 1);
    }

    #[tokio::test]
    async fn always_overwrites() {
        let storage = InMemoryStorage::new();
        let mut second = put("p", "1", WriteCondition::Always);
        second
            .attributes
            .insert("extra".to_string(), serde_json::json!(true));
        let _ = storage
            .batch_write("t", vec![put("p", "1", WriteCondition::Always)])
            .await;
        let _ = storage.batch_write("t", vec![second]).await;

        let Ok(Some(item)) = storage.get_item("t", &ItemKey::new("p", "1")).await else {
            panic!("item missing");
        };
        assert_eq!(item.attributes.get("extra"), Some(&serde_json::json!(true)));
        assert_eq!(storage.len("t").await, 1);
    }

    #[tokio::test]
    async fn query_paginates_within_partition() {
        let storage = InMemoryStorage::new();
        let requests = ["a", "b", "c"]
            .iter()
            .map(|s| put("p", s, WriteCondition::Always))
            .chain(std::iter::once(put("q", "a", WriteCondition::Always)))
            .collect();
        let _ = storage.batch_write("t", requests).await;

        let Ok(first) = storage.query("t", "p", None, 2).await else {
            panic!("query failed");
        };
        let sorts: Vec<_> = first.items.iter().map(|i| i.key.sort.as_str()).collect();
        assert_eq!(sorts, vec!["a", "b"]);
        assert_eq!(first.next_cursor.as_deref(), Some("b"));

        let Ok(second) = storage.query("t", "p", first.next_cursor.as_deref(), 2).await else {
            panic!("query failed");
        };
        let sorts: Vec<_> = second.items.iter().map(|i| i.key.sort.as_str()).collect();
        assert_eq!(sorts, vec!["c"]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn query_unknown_table_is_empty() {
        let storage = InMemoryStorage::new();
        let Ok(page) = storage.query("missing", "p", None, 10).await else {
            panic!("query failed");
        };
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
