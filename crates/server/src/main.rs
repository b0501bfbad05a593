//! harbor server entry point.
//!
//! Boots the worker against the configured upstream and serves the proxy.
//! Logs go to stderr as JSON.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use harbor_core::{AppConfig, CacheDb};
use harbor_worker::{FetchClient, FetchConfig, Worker};

mod app;
mod control;
mod error;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        "Starting harbor on {} for {} (upstream {})",
        config.listen_addr,
        config.origin,
        config.upstream
    );

    let db = CacheDb::open(&config.db_path).await?;
    let fetcher = FetchClient::new(FetchConfig::from_app(&config)?)?;
    let worker = Arc::new(Worker::new(&config, db, Arc::new(fetcher))?);

    if let Err(e) = worker.start().await {
        tracing::error!("worker not installed, forwarding without cache: {}", e);
    }

    let state = app::AppState::new(Arc::clone(&worker), &config)?;
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.shutdown().await;
    tracing::info!("harbor stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
