//! Test doubles shared by unit tests across modules.
//!
//! [`ScriptedStorage`] wraps an [`InMemoryStorage`] and lets a test script
//! how each `batch_write` call behaves, while recording the keys submitted
//! on every call. [`RecordingQueue`] captures sent messages and can be told
//! to refuse sends.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::queue::{MessageId, QueueClient, QueueError};
use crate::storage::{
    BatchWriteOutput, InMemoryStorage, ItemKey, QueryPage, StorageClient, StorageError,
    StoredItem, WriteCondition, WriteRequest,
};
use crate::writer::{BatchWriter, Record, RetryConfig};

/// Behaviour of one scripted `batch_write` call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Commit everything.
    Succeed,
    /// Commit all but the last `n` requests and report those as unprocessed.
    LeaveUnprocessed(usize),
    /// Fail the whole call.
    Fail(StorageError),
}

/// Storage double driven by a script of [`Step`]s.
///
/// Once the script runs out every call succeeds. Writes to a partition in
/// the poisoned set are always rejected.
#[derive(Debug, Default)]
pub struct ScriptedStorage {
    inner: InMemoryStorage,
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Vec<ItemKey>>>,
    poisoned: Mutex<HashSet<String>>,
}

impl ScriptedStorage {
    /// Creates a storage double that follows `script`.
    #[must_use]
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Rejects every write that touches `partition`.
    pub fn poison_partition(&self, partition: &str) {
        self.poisoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partition.to_string());
    }

    /// Keys submitted on every `batch_write` call, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<ItemKey>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests submitted on every `batch_write` call.
    #[must_use]
    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls().iter().map(Vec::len).collect()
    }

    /// The backing in-memory store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl StorageClient for ScriptedStorage {
    async fn batch_write(
        &self,
        table: &str,
        mut requests: Vec<WriteRequest>,
    ) -> Result<BatchWriteOutput, StorageError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(requests.iter().map(|r| r.key.clone()).collect());

        let poisoned = {
            let set = self.poisoned.lock().unwrap_or_else(PoisonError::into_inner);
            requests.iter().any(|r| set.contains(&r.key.partition))
        };
        if poisoned {
            return Err(StorageError::Rejected("poisoned partition".to_string()));
        }

        let step = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Step::Succeed);

        match step {
            Step::Succeed => self.inner.batch_write(table, requests).await,
            Step::LeaveUnprocessed(n) => {
                let keep = requests.len().saturating_sub(n);
                let unprocessed = requests.split_off(keep);
                let mut output = self.inner.batch_write(table, requests).await?;
                output.unprocessed = unprocessed;
                Ok(output)
            }
            Step::Fail(error) => Err(error),
        }
    }

    async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
    ) -> Result<Option<StoredItem>, StorageError> {
        self.inner.get_item(table, key).await
    }

    async fn query(
        &self,
        table: &str,
        partition: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<QueryPage, StorageError> {
        self.inner.query(table, partition, cursor, limit).await
    }
}

/// Retry schedule with millisecond delays so tests stay fast.
#[must_use]
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new(5, Duration::from_millis(1), 2.0)
}

/// Builds a [`BatchWriter`] over a fresh [`ScriptedStorage`].
#[must_use]
pub fn scripted_writer(script: Vec<Step>) -> (BatchWriter, Arc<ScriptedStorage>) {
    let storage = Arc::new(ScriptedStorage::new(script));
    let dyn_storage: Arc<dyn StorageClient> = Arc::clone(&storage) as Arc<dyn StorageClient>;
    (BatchWriter::new(dyn_storage, fast_retry()), storage)
}

/// Minimal record for writer tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRecord {
    /// Partition to write to.
    pub partition: String,
    /// Sequence number, used as the sort key.
    pub seq: usize,
    #[serde(skip)]
    condition: WriteCondition,
}

impl TestRecord {
    /// Creates a record in `partition` with sort key `seq` (zero-padded).
    #[must_use]
    pub fn new(partition: &str, seq: usize) -> Self {
        Self {
            partition: partition.to_string(),
            seq,
            condition: WriteCondition::Always,
        }
    }

    /// Marks the record as insert-only.
    #[must_use]
    pub fn if_absent(mut self) -> Self {
        self.condition = WriteCondition::IfAbsent;
        self
    }
}

impl Record for TestRecord {
    fn key(&self) -> ItemKey {
        ItemKey::new(self.partition.clone(), format!("{:06}", self.seq))
    }

    fn condition(&self) -> WriteCondition {
        self.condition
    }
}

/// Queue double that records message bodies.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    sent: Mutex<Vec<String>>,
    refuse: bool,
}

impl RecordingQueue {
    /// A queue that accepts every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that refuses every message.
    #[must_use]
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Bodies of every accepted message.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl QueueClient for RecordingQueue {
    async fn send_message(&self, body: String) -> Result<MessageId, QueueError> {
        if self.refuse {
            return Err(QueueError::Unavailable("queue refused send".to_string()));
        }
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.push(body);
        Ok(MessageId::new(format!("msg-{}", sent.len())))
    }
}
