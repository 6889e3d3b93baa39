//! PostgreSQL implementation of the storage engine.
//!
//! Every logical table lives in one `items` table keyed by
//! `(table_name, partition_key, sort_key)`. A batch write runs in a single
//! transaction, so this backend never reports unprocessed items; failures
//! surface as a whole-call [`StorageError`] instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{
    BatchWriteOutput, ItemKey, MAX_BATCH_SIZE, QueryPage, StorageClient, StorageError, StoredItem,
    WriteCondition, WriteRequest,
};

const UPSERT_SQL: &str = "INSERT INTO items (table_name, partition_key, sort_key, attributes, updated_at) \
     VALUES ($1, $2, $3, $4, now()) \
     ON CONFLICT (table_name, partition_key, sort_key) \
     DO UPDATE SET attributes = EXCLUDED.attributes, updated_at = EXCLUDED.updated_at";

const INSERT_IF_ABSENT_SQL: &str = "INSERT INTO items (table_name, partition_key, sort_key, attributes, updated_at) \
     VALUES ($1, $2, $3, $4, now()) \
     ON CONFLICT (table_name, partition_key, sort_key) DO NOTHING";

type ItemRow = (String, String, serde_json::Value, DateTime<Utc>);

/// PostgreSQL-backed storage engine using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a storage engine over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and applies the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the database cannot be
    /// reached or the schema cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("migration failed: {e}")))?;

        tracing::info!(max_connections, "postgres storage ready");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl StorageClient for PostgresStorage {
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

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut output = BatchWriteOutput::default();

        for request in requests {
            let sql = match request.condition {
                WriteCondition::Always => UPSERT_SQL,
                WriteCondition::IfAbsent => INSERT_IF_ABSENT_SQL,
            };
            let attributes = serde_json::Value::Object(request.attributes);
            let result = sqlx::query(sql)
                .bind(table)
                .bind(&request.key.partition)
                .bind(&request.key.sort)
                .bind(&attributes)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

            if result.rows_affected() == 0 {
                output.skipped.push(request.key);
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(output)
    }

    async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
    ) -> Result<Option<StoredItem>, StorageError> {
        let row = sqlx::query_as::<_, ItemRow>(
            "SELECT partition_key, sort_key, attributes, updated_at FROM items \
             WHERE table_name = $1 AND partition_key = $2 AND sort_key = $3",
        )
        .bind(table)
        .bind(&key.partition)
        .bind(&key.sort)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(into_stored_item).transpose()
    }

    async fn query(
        &self,
        table: &str,
        partition: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<QueryPage, StorageError> {
        // Fetch one extra row to learn whether another page exists.
        let fetch = i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT partition_key, sort_key, attributes, updated_at FROM items \
             WHERE table_name = $1 AND partition_key = $2 \
             AND ($3::text IS NULL OR sort_key > $3) \
             ORDER BY sort_key ASC LIMIT $4",
        )
        .bind(table)
        .bind(partition)
        .bind(cursor)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut items = rows
            .into_iter()
            .map(into_stored_item)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|item| item.key.sort.clone())
        } else {
            None
        };

        Ok(QueryPage { items, next_cursor })
    }
}

fn into_stored_item(
    (partition, sort, attributes, updated_at): ItemRow,
) -> Result<StoredItem, StorageError> {
    let serde_json::Value::Object(attributes) = attributes else {
        return Err(StorageError::Rejected(format!(
            "item {partition}/{sort} holds non-object attributes"
        )));
    };
    Ok(StoredItem {
        key: ItemKey::new(partition, sort),
        attributes,
        updated_at,
    })
}

/// Classifies a driver error into the storage error taxonomy.
fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::Unavailable(err.to_string()),
        // serialization_failure, deadlock_detected
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40001" | "40P01")) => {
            StorageError::Throttled
        }
        _ => StorageError::Rejected(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_retryable() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
    }

    #[test]
    fn row_not_found_is_rejected() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::Rejected(_)));
    }

    #[test]
    fn non_object_attributes_are_rejected() {
        let row: ItemRow = (
            "p".to_string(),
            "s".to_string(),
            serde_json::json!([1, 2]),
            Utc::now(),
        );
        assert!(into_stored_item(row).is_err());
    }

    #[test]
    fn object_attributes_convert() {
        let row: ItemRow = (
            "p".to_string(),
            "s".to_string(),
            serde_json::json!({"a": 1}),
            Utc::now(),
        );
        let item = into_stored_item(row);
        assert!(matches!(item, Ok(ref i) if i.key == ItemKey::new("p", "s")));
    }
}
