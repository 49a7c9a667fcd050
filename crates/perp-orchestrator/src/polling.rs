//! Continuous REST polling cadence (C9 integration).
//!
//! Once the historical backfill and live WS collectors are running, open
//! interest, long/short ratio, and premium funding rate keep being polled on
//! a fixed cadence rather than streamed — none of the three venues offer a
//! WS channel for them. Each tick re-fetches a window wide enough to absorb
//! one missed cycle, so a single slow tick doesn't leave a gap.

use crate::backfill::BackfillRunner;
use crate::error::AppResult;
use perp_fetch::{ClientPool, FetchStats};
use perp_storage::StorageGateway;
use perp_telemetry::StatusSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Overlap applied to the polling window so a tick that runs a little late
/// (or a prior tick that failed outright) can't create a silent gap.
const WINDOW_OVERLAP_FACTOR: i64 = 2;

pub struct PollingLoop<S: StatusSink> {
    client_pool: Arc<ClientPool>,
    gateway: Arc<StorageGateway>,
    status_sink: Arc<S>,
    stats: Arc<FetchStats>,
    coinalyze_key: Option<String>,
    mt_basket: Vec<String>,
}

impl<S: StatusSink> PollingLoop<S> {
    pub fn new(
        client_pool: Arc<ClientPool>,
        gateway: Arc<StorageGateway>,
        status_sink: Arc<S>,
        stats: Arc<FetchStats>,
        coinalyze_key: Option<String>,
        mt_basket: Vec<String>,
    ) -> Self {
        Self { client_pool, gateway, status_sink, stats, coinalyze_key, mt_basket }
    }

    /// Run the polling cadence until `shutdown` fires.
    pub async fn run(
        &self,
        symbols: &[String],
        concurrency: usize,
        direct_proxy_split: f64,
        cadence_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> AppResult<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(cadence_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(symbols, concurrency, direct_proxy_split, cadence_secs).await {
                        warn!(error = %e, "polling tick failed, continuing on next cadence");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("polling loop shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn tick(&self, symbols: &[String], concurrency: usize, direct_proxy_split: f64, cadence_secs: u64) -> AppResult<()> {
        let now_ms = now_millis();
        let window_ms = (cadence_secs as i64) * 1000 * WINDOW_OVERLAP_FACTOR;
        let runner = BackfillRunner::new(
            self.client_pool.clone(),
            self.gateway.clone(),
            self.status_sink.clone(),
            self.stats.clone(),
            now_ms - window_ms,
            now_ms,
            self.coinalyze_key.clone(),
            self.mt_basket.clone(),
        );
        runner.run_polling_tick(symbols, concurrency, direct_proxy_split).await
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
