//! Top-level application orchestration (C9).
//!
//! Wires every other crate together: runs the historical REST backfill to
//! fill the configured lookback window, then (in `serve` mode) keeps four
//! independent loops alive concurrently — live WS collectors, continuous
//! REST polling, the derived-metrics cadence, a bucket-flush ticker, and a
//! retention sweep — until a shutdown signal arrives, at which point every
//! loop is asked to drain before the process exits.

use crate::backfill::BackfillRunner;
use crate::collectors::Collectors;
use crate::config::{AppConfig, OperatingMode};
use crate::error::AppResult;
use crate::polling::PollingLoop;
use perp_feed::BucketAggregator;
use perp_fetch::{ClientPool, FetchStats};
use perp_storage::{DerivedMetricsEngine, StorageGateway};
use perp_telemetry::{Heartbeat, HeartbeatStatus, StatusSink};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{error, info};

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

pub struct Application<S: StatusSink> {
    config: AppConfig,
    client_pool: Arc<ClientPool>,
    gateway: Arc<StorageGateway>,
    status_sink: Arc<S>,
    stats: Arc<FetchStats>,
    bucket: Arc<BucketAggregator>,
}

impl<S: StatusSink + 'static> Application<S> {
    pub async fn new(config: AppConfig, status_sink: Arc<S>) -> AppResult<Self> {
        let dsn = config.storage_dsn()?;
        let gateway = StorageGateway::connect(&dsn, config.storage.max_connections)
            .await?
            .with_chunk_size(config.storage.chunk_size);
        Ok(Self {
            client_pool: Arc::new(ClientPool::new(config.proxy())?),
            gateway: Arc::new(gateway),
            status_sink,
            stats: Arc::new(FetchStats::new()),
            bucket: Arc::new(BucketAggregator::new()),
            config,
        })
    }

    /// Creates `perp_data`/`perp_metrics`/the status tables if they don't
    /// already exist. Idempotent, safe to call on every startup.
    pub async fn run_preflight(&self) -> AppResult<()> {
        self.gateway.init_schema().await?;
        Ok(())
    }

    /// Run the historical backfill, then (in `serve` mode) the continuous
    /// pipeline until `shutdown` fires.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> AppResult<()> {
        self.run_backfill().await?;

        if self.config.mode == OperatingMode::BackfillOnly {
            info!("backfill-only mode complete, exiting");
            return Ok(());
        }

        self.run_serve(shutdown).await
    }

    async fn run_backfill(&self) -> AppResult<()> {
        let now = now_ms();
        let window_start = now - self.config.backfill_window_days * 24 * 60 * 60 * 1000;
        let runner = BackfillRunner::new(
            self.client_pool.clone(),
            self.gateway.clone(),
            self.status_sink.clone(),
            self.stats.clone(),
            window_start,
            now,
            self.config.coinalyze_key(),
            self.config.mt_basket.clone(),
        );

        info!(symbols = self.config.symbols.len(), window_days = self.config.backfill_window_days, "starting historical backfill");
        runner
            .run(&self.config.symbols, self.config.concurrency.backfill, self.config.direct_proxy_split)
            .await?;
        self.status_sink.heartbeat(Heartbeat::new("backfill", 0, HeartbeatStatus::Completed)).await;

        info!("running full derived-metrics backfill");
        let metrics_engine = DerivedMetricsEngine::new(self.gateway.pool().clone());
        let rows = metrics_engine.run_full_backfill(now_ms()).await?;
        info!(rows, "derived-metrics backfill complete");

        Ok(())
    }

    async fn run_serve(&self, shutdown: watch::Receiver<bool>) -> AppResult<()> {
        let collectors = Collectors::new(
            self.gateway.clone(),
            self.bucket.clone(),
            self.status_sink.clone(),
            self.config.mt_basket.clone(),
        );
        let collector_handles = collectors.spawn_all(
            &self.config.symbols,
            self.config.concurrency.ws_subscribe_stagger_ms,
            &shutdown,
        );
        info!(tasks = collector_handles.len(), "live collectors started");

        let polling = PollingLoop::new(
            self.client_pool.clone(),
            self.gateway.clone(),
            self.status_sink.clone(),
            self.stats.clone(),
            self.config.coinalyze_key(),
            self.config.mt_basket.clone(),
        );
        let polling_handle = {
            let symbols = self.config.symbols.clone();
            let concurrency = self.config.concurrency.polling;
            let split = self.config.direct_proxy_split;
            let cadence = self.config.polling_cadence_secs;
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = polling.run(&symbols, concurrency, split, cadence, shutdown).await {
                    error!(error = %e, "polling loop exited with an error");
                }
            })
        };

        let metrics_handle = {
            let engine = DerivedMetricsEngine::new(self.gateway.pool().clone());
            let cadence = self.config.derived_metrics_cadence_secs;
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_derived_metrics_loop(engine, cadence, shutdown).await })
        };

        let bucket_flush_handle = {
            let gateway = self.gateway.clone();
            let bucket = self.bucket.clone();
            let cadence = self.config.bucket_flush_interval_secs;
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_bucket_flush_loop(gateway, bucket, cadence, shutdown).await })
        };

        let retention_handle = {
            let gateway = self.gateway.clone();
            let retention_days = self.config.storage.retention_days;
            let cadence = self.config.storage.retention_sweep_interval_secs;
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_retention_loop(gateway, retention_days, cadence, shutdown).await })
        };

        self.status_sink.heartbeat(Heartbeat::new("orchestrator", 0, HeartbeatStatus::Running)).await;

        for handle in collector_handles {
            let _ = handle.await;
        }
        let _ = polling_handle.await;
        let _ = metrics_handle.await;
        let _ = bucket_flush_handle.await;
        let _ = retention_handle.await;

        self.status_sink.heartbeat(Heartbeat::new("orchestrator", 0, HeartbeatStatus::Stopped)).await;
        info!("orchestrator drained, exiting");
        Ok(())
    }
}

async fn run_derived_metrics_loop(engine: DerivedMetricsEngine, cadence_secs: u64, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(cadence_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.run_incremental(now_ms()).await {
                    Ok(rows) => info!(rows, "derived-metrics incremental pass complete"),
                    Err(e) => error!(error = %e, "derived-metrics incremental pass failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn run_bucket_flush_loop(
    gateway: Arc<StorageGateway>,
    bucket: Arc<BucketAggregator>,
    cadence_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(cadence_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush_buckets(&gateway, &bucket).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    flush_buckets(&gateway, &bucket).await;
                    return;
                }
            }
        }
    }
}

async fn flush_buckets(gateway: &StorageGateway, bucket: &BucketAggregator) {
    let due = bucket.flush_due(now_ms());
    if due.is_empty() {
        return;
    }
    let rows = due.len();
    if let Err(e) = gateway.upsert_samples(&due).await {
        error!(error = %e, rows, "bucket flush upsert failed");
    }
}

async fn run_retention_loop(
    gateway: Arc<StorageGateway>,
    retention_days: i64,
    cadence_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(cadence_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cutoff = now_ms() - retention_days * 24 * 60 * 60 * 1000;
                match gateway.retention_sweep(cutoff).await {
                    Ok(deleted) => info!(deleted, "retention sweep complete"),
                    Err(e) => error!(error = %e, "retention sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
