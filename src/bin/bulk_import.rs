//! Bulk import CLI.
//!
//! Reads a CSV file, derives a deterministic identity for every row from
//! its natural-key columns and writes the rows through the batch writer.
//! Re-running an import overwrites the same records.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lifelog_gateway::import::{read_records, run_import};
use lifelog_gateway::storage::{InMemoryStorage, PostgresStorage, StorageClient};
use lifelog_gateway::writer::{BatchWriter, RetryConfig};

/// Import tabular data into the status API's storage.
#[derive(Debug, Parser)]
#[command(name = "bulk-import")]
#[command(version, about = "Import a CSV file through the batched writer", long_about = None)]
struct Cli {
    /// CSV file with a header row
    #[arg(short, long)]
    file: PathBuf,

    /// Record kind; also the partition the records are written to
    #[arg(short, long)]
    kind: String,

    /// Comma-separated natural-key columns
    #[arg(long, value_delimiter = ',', required = true)]
    key_columns: Vec<String>,

    /// Destination table
    #[arg(short, long, default_value = "imports")]
    table: String,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum database connections
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Write to an in-memory store instead of the database
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let file = File::open(&cli.file)
        .with_context(|| format!("failed to open {}", cli.file.display()))?;
    let records = read_records(file, &cli.kind, &cli.key_columns)
        .with_context(|| format!("failed to read {}", cli.file.display()))?;

    let storage: Arc<dyn StorageClient> = if cli.dry_run {
        tracing::info!("dry run: writing to in-memory storage");
        Arc::new(InMemoryStorage::new())
    } else {
        let url = cli
            .database_url
            .as_deref()
            .context("--database-url or DATABASE_URL is required unless --dry-run is set")?;
        Arc::new(
            PostgresStorage::connect(url, cli.max_connections)
                .await
                .context("failed to connect to the database")?,
        )
    };
    let writer = BatchWriter::new(storage, RetryConfig::DEFAULT);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling import");
            on_signal.cancel();
        }
    });

    let report = run_import(&writer, &cli.table, &records, &cancel)
        .await
        .context("import aborted")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed_chunk_offsets.is_empty() {
        anyhow::bail!(
            "{} chunk(s) failed at offsets {:?}",
            report.failed_chunk_offsets.len(),
            report.failed_chunk_offsets
        );
    }
    Ok(())
}
