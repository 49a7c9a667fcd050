//! Perp market-data orchestrator entry point.

use anyhow::Result;
use clap::Parser;
use perp_orchestrator::{AppConfig, Application};
use perp_storage::PostgresStatusSink;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Perp market-data ingestion orchestrator.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PERP_CONFIG env var).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    perp_telemetry::init_logging()?;
    info!("starting perp-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref())?;
    info!(?config.mode, symbols = config.symbols.len(), "configuration loaded");

    let status_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.storage_dsn()?)
        .await?;
    let status_sink = Arc::new(PostgresStatusSink::new(status_pool));

    let app = Application::new(config, status_sink).await?;

    info!("running preflight schema initialization");
    app.run_preflight().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining");
        let _ = shutdown_tx.send(true);
    });

    app.run(shutdown_rx).await?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
