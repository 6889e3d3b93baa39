//! lifelog-gateway server entry point.
//!
//! Starts the Axum HTTP server and the queue dispatchers that drain
//! accepted webhooks into the event log.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use lifelog_gateway::api;
use lifelog_gateway::app_state::AppState;
use lifelog_gateway::config::{GatewayConfig, LogFormat, StorageBackend};
use lifelog_gateway::queue::{DispatchConfig, InMemoryQueue, QueueClient, run_dispatcher};
use lifelog_gateway::service::{EventConsumer, EventLog, EventPublisher, IdempotencyStore};
use lifelog_gateway::storage::{InMemoryStorage, PostgresStorage, StorageClient};
use lifelog_gateway::writer::{BatchWriter, RetryConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting lifelog-gateway");
    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET is not set; signed endpoints will reject every request");
    }

    // Build storage layer
    let storage: Arc<dyn StorageClient> = match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; data is lost on restart");
            Arc::new(InMemoryStorage::new())
        }
        StorageBackend::Postgres => Arc::new(
            PostgresStorage::connect(&config.database_url, config.database_max_connections)
                .await?,
        ),
    };
    let writer = BatchWriter::new(storage, RetryConfig::DEFAULT);

    // Build service layer
    let queue = Arc::new(InMemoryQueue::new(config.queue_max_receive_count));
    let event_log = Arc::new(EventLog::new(writer.clone(), config.events_table.clone()));
    let idempotency = Arc::new(IdempotencyStore::new(
        writer,
        config.idempotency_table.clone(),
        chrono::Duration::from_std(config.idempotency_ttl)?,
    ));
    let publisher = Arc::new(EventPublisher::new(
        Arc::clone(&queue) as Arc<dyn QueueClient>
    ));
    let consumer = Arc::new(EventConsumer::new(Arc::clone(&event_log)));

    // Start dispatchers
    let shutdown = CancellationToken::new();
    let dispatch = DispatchConfig {
        batch_size: config.queue_batch_size,
        poll_interval: config.queue_poll_interval,
    };
    let dispatchers: Vec<_> = (0..config.consumer_concurrency.max(1))
        .map(|_| {
            tokio::spawn(run_dispatcher(
                Arc::clone(&queue),
                Arc::clone(&consumer),
                dispatch,
                shutdown.clone(),
            ))
        })
        .collect();

    // Build application state
    let app_state = AppState {
        publisher,
        event_log,
        idempotency,
        webhook_secret: config
            .webhook_secret
            .as_deref()
            .map(|s| Arc::from(s.as_bytes())),
        shutdown: shutdown.clone(),
    };

    // Build router
    let app = api::build_router(app_state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for dispatcher in dispatchers {
        if let Err(e) = dispatcher.await {
            tracing::error!(error = %e, "dispatcher task failed");
        }
    }
    tracing::info!(
        pending = queue.ready_len().await,
        dead_letters = queue.dead_letters().await.len(),
        "shutdown complete"
    );

    Ok(())
}
