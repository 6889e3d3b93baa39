//! Chunked, retrying bulk writer.
//!
//! [`BatchWriter`] marshals every record up front, splits the result into
//! chunks of at most [`MAX_BATCH_SIZE`] requests and writes the chunks in
//! order. When the engine leaves part of a chunk unprocessed, only that
//! remainder is resubmitted, with exponential backoff, until the chunk
//! commits or the retry budget runs out.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::RetryConfig;
use crate::storage::{
    Attributes, ItemKey, MAX_BATCH_SIZE, StorageClient, StorageError, WriteCondition, WriteRequest,
};

/// A domain value that can be written through the [`BatchWriter`].
///
/// The record must serialize to a JSON object; that object becomes the
/// stored attribute map.
pub trait Record: Serialize {
    /// Key the record is stored under.
    fn key(&self) -> ItemKey;

    /// Put condition for this record.
    fn condition(&self) -> WriteCondition {
        WriteCondition::Always
    }
}

/// Errors returned by the [`BatchWriter`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WriteError {
    /// A record could not be converted into a write request. Nothing was
    /// sent to the engine.
    #[error("record {index} could not be marshaled: {reason}")]
    Marshal {
        /// Position of the record in the input.
        index: usize,
        /// Why marshaling failed.
        reason: String,
    },

    /// A chunk still had unprocessed items after every retry was spent.
    #[error(
        "chunk at offset {chunk_offset} left {} items unprocessed after {attempts} attempts",
        .unprocessed.len()
    )]
    RetriesExhausted {
        /// Offset of the chunk's first record in the original input.
        chunk_offset: usize,
        /// Number of batch-write calls made for the chunk.
        attempts: u32,
        /// Keys that were never committed.
        unprocessed: Vec<ItemKey>,
        /// Error from the final call, if it failed as a whole.
        last_error: Option<StorageError>,
    },

    /// The engine refused a chunk with a non-retryable error.
    #[error("chunk at offset {chunk_offset} rejected: {source}")]
    Rejected {
        /// Offset of the chunk's first record in the original input.
        chunk_offset: usize,
        /// Error reported by the engine.
        source: StorageError,
    },

    /// The caller cancelled the write while a chunk was in flight or
    /// backing off.
    #[error("write cancelled at chunk offset {chunk_offset} with {remaining} items uncommitted")]
    Cancelled {
        /// Offset of the chunk that was interrupted.
        chunk_offset: usize,
        /// Items of that chunk not yet committed.
        remaining: usize,
    },
}

impl WriteError {
    /// Offset of the chunk the error refers to, if any.
    #[must_use]
    pub const fn chunk_offset(&self) -> Option<usize> {
        match self {
            Self::Marshal { .. } => None,
            Self::RetriesExhausted { chunk_offset, .. }
            | Self::Rejected { chunk_offset, .. }
            | Self::Cancelled { chunk_offset, .. } => Some(*chunk_offset),
        }
    }

    /// Returns `true` if the caller's cancellation stopped the write.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Totals for a completed write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Records committed.
    pub written: usize,
    /// `IfAbsent` records skipped because they already existed.
    pub skipped: usize,
    /// Chunks processed.
    pub chunks: usize,
}

/// A chunk that could not be committed during a report-mode write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFailure {
    /// Offset of the chunk's first record in the original input.
    pub chunk_offset: usize,
    /// Number of records in the chunk.
    pub size: usize,
    /// Why the chunk failed.
    pub error: WriteError,
}

/// Result of [`BatchWriter::batch_write_report`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    /// Totals across the chunks that committed.
    pub summary: WriteSummary,
    /// Chunks that did not commit.
    pub failed: Vec<ChunkFailure>,
}

/// What to do when a chunk fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnChunkFailure {
    Abort,
    Continue,
}

#[derive(Debug, Clone, Copy)]
struct ChunkOutcome {
    written: usize,
    skipped: usize,
}

/// Chunked, retrying writer over a [`StorageClient`].
#[derive(Debug, Clone)]
pub struct BatchWriter {
    storage: Arc<dyn StorageClient>,
    retry: RetryConfig,
}

impl BatchWriter {
    /// Creates a writer over `storage` with the given retry schedule.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageClient>, retry: RetryConfig) -> Self {
        Self { storage, retry }
    }

    /// Returns the underlying storage client.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }

    /// Writes `records` to `table`, stopping at the first chunk that fails.
    ///
    /// Chunks before the failing one stay committed. Empty input is a
    /// no-op that makes no storage calls.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Marshal`] before any storage call if a record
    /// cannot be marshaled, and a chunk-scoped [`WriteError`] when a chunk
    /// exhausts its retries, is rejected, or is cancelled.
    pub async fn batch_write<R: Record>(
        &self,
        table: &str,
        records: &[R],
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, WriteError> {
        let report = self
            .write_chunks(table, records, cancel, OnChunkFailure::Abort)
            .await?;
        Ok(report.summary)
    }

    /// Writes `records` to `table`, continuing past chunks that exhaust
    /// their retries or are rejected, and reports every failed chunk.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Marshal`] before any storage call if a record
    /// cannot be marshaled, and [`WriteError::Cancelled`] if the caller
    /// cancels mid-write.
    pub async fn batch_write_report<R: Record>(
        &self,
        table: &str,
        records: &[R],
        cancel: &CancellationToken,
    ) -> Result<WriteReport, WriteError> {
        self.write_chunks(table, records, cancel, OnChunkFailure::Continue)
            .await
    }

    /// Writes a single record (a batch of one).
    ///
    /// # Errors
    ///
    /// Same as [`BatchWriter::batch_write`].
    pub async fn write_one<R: Record>(
        &self,
        table: &str,
        record: &R,
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, WriteError> {
        self.batch_write(table, std::slice::from_ref(record), cancel)
            .await
    }

    async fn write_chunks<R: Record>(
        &self,
        table: &str,
        records: &[R],
        cancel: &CancellationToken,
        on_failure: OnChunkFailure,
    ) -> Result<WriteReport, WriteError> {
        let requests = marshal_all(records)?;
        let mut report = WriteReport::default();

        for (chunk_offset, chunk) in into_chunks(requests) {
            let size = chunk.len();
            match self.write_chunk(table, chunk_offset, chunk, cancel).await {
                Ok(outcome) => {
                    report.summary.written += outcome.written;
                    report.summary.skipped += outcome.skipped;
                    report.summary.chunks += 1;
                }
                Err(error) if error.is_cancelled() || on_failure == OnChunkFailure::Abort => {
                    return Err(error);
                }
                Err(error) => {
                    tracing::error!(table, chunk_offset, size, %error, "chunk failed; continuing");
                    report.failed.push(ChunkFailure {
                        chunk_offset,
                        size,
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Commits one chunk, resubmitting only what the engine left
    /// unprocessed on each attempt.
    async fn write_chunk(
        &self,
        table: &str,
        chunk_offset: usize,
        chunk: Vec<WriteRequest>,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome, WriteError> {
        let total = chunk.len();
        let mut remaining = chunk;
        let mut skipped = 0;
        let mut retries: u32 = 0;

        loop {
            let call = self.storage.batch_write(table, remaining.clone());
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(WriteError::Cancelled { chunk_offset, remaining: remaining.len() });
                }
                result = call => result,
            };

            let last_error = match result {
                Ok(output) => {
                    skipped += output.skipped.len();
                    remaining = output.unprocessed;
                    if remaining.is_empty() {
                        tracing::debug!(table, chunk_offset, total, retries, "chunk committed");
                        return Ok(ChunkOutcome {
                            written: total.saturating_sub(skipped),
                            skipped,
                        });
                    }
                    None
                }
                Err(source) if source.is_retryable() => Some(source),
                Err(source) => {
                    return Err(WriteError::Rejected {
                        chunk_offset,
                        source,
                    });
                }
            };

            if retries >= self.retry.max_retries {
                tracing::error!(
                    table,
                    chunk_offset,
                    unprocessed = remaining.len(),
                    attempts = retries + 1,
                    "chunk retries exhausted"
                );
                return Err(WriteError::RetriesExhausted {
                    chunk_offset,
                    attempts: retries + 1,
                    unprocessed: remaining.into_iter().map(|r| r.key).collect(),
                    last_error,
                });
            }

            let delay = self.retry.delay_for_attempt(retries);
            retries += 1;
            tracing::warn!(
                table,
                chunk_offset,
                unprocessed = remaining.len(),
                retry = retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "resubmitting unprocessed items"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(WriteError::Cancelled { chunk_offset, remaining: remaining.len() });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Converts one record into the engine's wire representation.
///
/// # Errors
///
/// Returns the serializer's message when the record cannot be serialized
/// or does not serialize to a JSON object.
pub fn marshal<R: Record>(record: &R) -> Result<WriteRequest, String> {
    let attributes: Attributes = match serde_json::to_value(record) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => return Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => return Err(e.to_string()),
    };
    Ok(WriteRequest {
        key: record.key(),
        attributes,
        condition: record.condition(),
    })
}

fn marshal_all<R: Record>(records: &[R]) -> Result<Vec<WriteRequest>, WriteError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| marshal(record).map_err(|reason| WriteError::Marshal { index, reason }))
        .collect()
}

/// Splits requests into `(offset, chunk)` pairs of at most
/// [`MAX_BATCH_SIZE`] requests.
fn into_chunks(requests: Vec<WriteRequest>) -> Vec<(usize, Vec<WriteRequest>)> {
    let mut chunks = Vec::with_capacity(requests.len().div_ceil(MAX_BATCH_SIZE));
    let mut iter = requests.into_iter().peekable();
    let mut offset = 0;
    while iter.peek().is_some() {
        let chunk: Vec<WriteRequest> = iter.by_ref().take(MAX_BATCH_SIZE).collect();
        let len = chunk.len();
        chunks.push((offset, chunk));
        offset += len;
    }
    chunks
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
