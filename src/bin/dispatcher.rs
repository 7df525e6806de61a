//! infer-dispatch server
//!
//! Usage:
//!   infer-dispatch
//!
//! Configuration comes from `DISPATCHER_CONFIG` (YAML path) and the
//! `DISPATCHER_*` environment variables; log filtering from `RUST_LOG`.

use anyhow::Context;
use infer_dispatch::{server, Dispatcher, DispatcherConfig};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = DispatcherConfig::load().context("loading dispatcher configuration")?;
    info!(
        bind_address = %config.bind_address,
        replicas = ?config.replicas,
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        cache_capacity = config.cache_capacity,
        "starting infer-dispatch {}",
        env!("CARGO_PKG_VERSION")
    );

    let dispatcher = Arc::new(Dispatcher::new(config).context("building dispatcher")?);
    dispatcher.start();

    server::serve(Arc::clone(&dispatcher), shutdown_signal())
        .await
        .context("serving HTTP")?;

    dispatcher.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        // without a signal handler, keep serving until the process is killed
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
