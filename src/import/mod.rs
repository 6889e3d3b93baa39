//! Bulk import of tabular data through the [`BatchWriter`].
//!
//! Every CSV row becomes one record whose identity is a UUID v5 over the
//! record kind and its natural-key columns. Importing the same file twice
//! therefore overwrites rather than duplicates.

use std::collections::{BTreeMap, HashMap};
use std::io;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::storage::ItemKey;
use crate::writer::{BatchWriter, Record, WriteError};

const KEY_SEPARATOR: char = '\u{1f}';

/// Errors raised while reading or importing a file.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// No natural-key columns were given.
    #[error("at least one key column is required")]
    NoKeyColumns,

    /// The header row lacks a key column.
    #[error("key column `{0}` is not in the header")]
    MissingKeyColumn(String),

    /// A row has an empty value in a key column.
    #[error("line {line}: key column `{column}` is empty")]
    EmptyKey {
        /// 1-based line number in the file.
        line: u64,
        /// Column that was empty.
        column: String,
    },

    /// The file is not valid CSV.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The write aborted (marshal failure or cancellation).
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// One imported row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRecord {
    /// Deterministic identity derived from the natural key.
    pub id: Uuid,
    /// Record kind; also the partition the record is stored in.
    pub kind: String,
    /// Every column of the row, by header name. Kept nested so a header
    /// named `id` or `kind` cannot shadow the record's identity.
    pub columns: BTreeMap<String, String>,
}

impl Record for ImportRecord {
    fn key(&self) -> ItemKey {
        ItemKey::new(self.kind.clone(), self.id.to_string())
    }
}

/// Identity of a record of `kind` with the given natural-key values.
#[must_use]
pub fn record_id(kind: &str, key_values: &[&str]) -> Uuid {
    let mut name = String::from(kind);
    for value in key_values {
        name.push(KEY_SEPARATOR);
        name.push_str(value);
    }
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Reads CSV rows (with a header) into records of `kind`.
///
/// Rows sharing a natural key collapse into one record holding the last
/// row's values, at the position where the key first appeared.
///
/// # Errors
///
/// Returns [`ImportError`] for invalid CSV, a missing key column, or a row
/// with an empty key value.
pub fn read_records<R: io::Read>(
    reader: R,
    kind: &str,
    key_columns: &[String],
) -> Result<Vec<ImportRecord>, ImportError> {
    if key_columns.is_empty() {
        return Err(ImportError::NoKeyColumns);
    }

    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let key_indices = key_columns
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| ImportError::MissingKeyColumn(column.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut records: Vec<ImportRecord> = Vec::new();
    let mut positions: HashMap<Uuid, usize> = HashMap::new();

    for row in rdr.records() {
        let row = row?;
        let line = row.position().map_or(0, csv::Position::line);

        let mut key_values = Vec::with_capacity(key_indices.len());
        for (&index, column) in key_indices.iter().zip(key_columns) {
            match row.get(index).map(str::trim) {
                Some(value) if !value.is_empty() => key_values.push(value),
                _ => {
                    return Err(ImportError::EmptyKey {
                        line,
                        column: column.clone(),
                    });
                }
            }
        }

        let record = ImportRecord {
            id: record_id(kind, &key_values),
            kind: kind.to_string(),
            columns: headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect(),
        };

        match positions.get(&record.id).and_then(|&i| records.get_mut(i)) {
            Some(existing) => {
                tracing::debug!(line, id = %record.id, "duplicate natural key; keeping last row");
                *existing = record;
            }
            None => {
                positions.insert(record.id, records.len());
                records.push(record);
            }
        }
    }

    Ok(records)
}

/// Outcome of [`run_import`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Records submitted.
    pub rows: usize,
    /// Records committed.
    pub written: usize,
    /// Offsets of chunks that could not be committed.
    pub failed_chunk_offsets: Vec<usize>,
}

/// Writes `records` to `table`, continuing past failed chunks.
///
/// # Errors
///
/// Returns [`ImportError::Write`] if a record cannot be marshaled or the
/// import is cancelled. Chunk failures are reported, not returned.
pub async fn run_import(
    writer: &BatchWriter,
    table: &str,
    records: &[ImportRecord],
    cancel: &CancellationToken,
) -> Result<ImportReport, ImportError> {
    tracing::info!(table, rows = records.len(), "import started");
    let report = writer.batch_write_report(table, records, cancel).await?;

    let report = ImportReport {
        rows: records.len(),
        written: report.summary.written,
        failed_chunk_offsets: report.failed.iter().map(|f| f.chunk_offset).collect(),
    };
    if report.failed_chunk_offsets.is_empty() {
        tracing::info!(table, written = report.written, "import finished");
    } else {
        tracing::warn!(
            table,
            written = report.written,
            failed_chunks = ?report.failed_chunk_offsets,
            "import finished with failed chunks"
        );
    }
    Ok(report)
}
