//! Idempotency key store.
//!
//! Records live in their own table, one item per scoped key (partition =
//! key, sort = `record`). Expiry is enforced on read: a record past its
//! `expires_at` is reported as a miss whether or not the engine has
//! evicted it yet.
//!
//! Records are written with [`WriteCondition::IfAbsent`]. The first record
//! stored for a key stays canonical until it expires; only an expired
//! record is ever replaced.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::{IdempotencyKey, IdempotencyRecord};
use crate::storage::{ItemKey, StorageError, WriteCondition};
use crate::writer::{BatchWriter, Record, WriteError};

const RECORD_SORT_KEY: &str = "record";

impl Record for IdempotencyRecord {
    fn key(&self) -> ItemKey {
        ItemKey::new(self.key.as_str(), RECORD_SORT_KEY)
    }

    fn condition(&self) -> WriteCondition {
        WriteCondition::IfAbsent
    }
}

/// Unconditional put of a record over an expired one.
#[derive(Serialize)]
#[serde(transparent)]
struct Replacement<'a>(&'a IdempotencyRecord);

impl Record for Replacement<'_> {
    fn key(&self) -> ItemKey {
        self.0.key()
    }
}

/// Store for cached responses of mutating operations.
#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    writer: BatchWriter,
    table: String,
    default_ttl: Duration,
}

impl IdempotencyStore {
    /// Creates a store writing to `table`. `default_ttl` is the lifetime
    /// used by the HTTP layer.
    #[must_use]
    pub fn new(writer: BatchWriter, table: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            writer,
            table: table.into(),
            default_ttl,
        }
    }

    /// Lifetime applied by callers that do not choose their own.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Looks up `key` as of now.
    ///
    /// # Errors
    ///
    /// Returns the [`StorageError`] if the read fails.
    pub async fn get(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StorageError> {
        self.get_at(key, Utc::now()).await
    }

    /// Looks up `key` as of `now`. Expired and undecodable records are
    /// misses.
    ///
    /// # Errors
    ///
    /// Returns the [`StorageError`] if the read fails.
    pub async fn get_at(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, StorageError> {
        let Some(record) = self.load(key).await? else {
            return Ok(None);
        };
        if record.is_expired_at(now) {
            tracing::debug!(%key, expires_at = %record.expires_at, "idempotency record expired");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Reads the stored record regardless of expiry.
    async fn load(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StorageError> {
        let item_key = ItemKey::new(key.as_str(), RECORD_SORT_KEY);
        let Some(item) = self.writer.storage().get_item(&self.table, &item_key).await? else {
            return Ok(None);
        };

        match serde_json::from_value(serde_json::Value::Object(item.attributes)) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(%key, error = %e, "ignoring undecodable idempotency record");
                Ok(None)
            }
        }
    }

    /// Stores the outcome of the first execution under `key` for `ttl`
    /// and returns the canonical record.
    ///
    /// If a live record already exists for `key` it is left untouched and
    /// returned instead of the new one. An expired record is replaced.
    ///
    /// # Errors
    ///
    /// Returns the writer's error if the record does not commit. A failed
    /// read of the existing record is reported as [`WriteError::Rejected`].
    pub async fn put(
        &self,
        key: &IdempotencyKey,
        status_code: u16,
        body: String,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<IdempotencyRecord, WriteError> {
        let now = Utc::now();
        let record = IdempotencyRecord::new(key.clone(), status_code, body, now, ttl);
        let summary = self.writer.write_one(&self.table, &record, cancel).await?;
        if summary.skipped == 0 {
            tracing::debug!(%key, status_code, expires_at = %record.expires_at, "idempotency record stored");
            return Ok(record);
        }

        let existing = self
            .load(key)
            .await
            .map_err(|source| WriteError::Rejected {
                chunk_offset: 0,
                source,
            })?;
        if let Some(existing) = existing.filter(|r| !r.is_expired_at(now)) {
            tracing::info!(%key, "idempotency key already recorded; keeping the first response");
            return Ok(existing);
        }

        self.writer
            .write_one(&self.table, &Replacement(&record), cancel)
            .await?;
        tracing::debug!(%key, status_code, expires_at = %record.expires_at, "expired idempotency record replaced");
        Ok(record)
    }
}
