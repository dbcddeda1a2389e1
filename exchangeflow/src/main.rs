//! Exchangeflow server.
//!
//! Wires in-memory collaborators, the dispatch loops and the HTTP surface.
//! Ctrl-C stops the listener and the loops; assembly runs already in flight
//! finish first.

use std::sync::Arc;

use anyhow::Context;
use exchangeflow::api::{self, AppState};
use exchangeflow::cancellation::CancellationToken;
use exchangeflow::collaborators::{
    InMemoryBlobStore, InMemoryCatalog, InMemoryFileStore, InMemoryQueueService, InMemoryTable,
};
use exchangeflow::config::OrchestratorConfig;
use exchangeflow::dispatch::Dispatcher;
use exchangeflow::observability::init_tracing;
use exchangeflow::pipelines::PipelineServices;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = OrchestratorConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_format)?;

    let services = Arc::new(
        PipelineServices::new(
            Arc::new(InMemoryTable::new()),
            Arc::new(InMemoryTable::new()),
            Arc::new(InMemoryTable::new()),
            Arc::new(InMemoryTable::new()),
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(InMemoryQueueService::default()),
            Arc::new(InMemoryCatalog::new()),
            Arc::new(InMemoryFileStore::new()),
        )
        .with_standards(config.standard_registry())
        .with_execution(config.execution)
        .with_batch_expiry(config.batch_expiry()),
    );

    let cancellation = CancellationToken::new();
    let settings = config.dispatch_settings();
    let dispatcher = Dispatcher::spawn(services.clone(), settings.clone(), cancellation.clone())
        .await
        .context("failed to prepare queues and tables")?;

    let app = api::router(AppState::new(services, settings.request_queue));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Exchangeflow listening");

    let shutdown = cancellation.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel("ctrl-c");
        })
        .await
        .context("server error")?;

    cancellation.cancel("server stopped");
    dispatcher.join().await;
    Ok(())
}
