//! Periodic ingestion summary, logged rather than scraped.
//!
//! Complements the always-on Prometheus gauges/counters in [`crate::metrics`]
//! with a human-readable rollup, the same way a daily digest complements
//! live dashboards: useful in a terminal or a log aggregator where nobody is
//! watching Grafana.

use crate::metrics::{FETCH_LATENCY_MS, STORAGE_CHUNK_LATENCY_MS};
use chrono::{DateTime, Utc};
use tracing::info;

/// Latency percentiles for one label value of a histogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyPercentiles {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Periodic summary reporter for ingestion latency.
pub struct IngestionSummaryReporter {
    exchanges: Vec<String>,
    start_time: DateTime<Utc>,
}

impl IngestionSummaryReporter {
    pub fn new(exchanges: Vec<String>) -> Self {
        Self {
            exchanges,
            start_time: Utc::now(),
        }
    }

    /// Fetch latency percentiles for one exchange, across all endpoints.
    pub fn fetch_latency(&self, exchange: &str) -> LatencyPercentiles {
        Self::percentiles_for_first_label(&FETCH_LATENCY_MS, exchange)
    }

    /// Storage chunk write latency percentiles for one table.
    pub fn storage_latency(&self, table: &str) -> LatencyPercentiles {
        Self::percentiles_for_first_label(&STORAGE_CHUNK_LATENCY_MS, table)
    }

    /// Percentiles across every series whose first label matches `value`,
    /// merging all matching series' buckets together.
    fn percentiles_for_first_label(
        histogram: &prometheus::HistogramVec,
        value: &str,
    ) -> LatencyPercentiles {
        let mut merged: Vec<(f64, u64)> = Vec::new();
        let mut total_count = 0u64;

        for mf in histogram.collect() {
            for m in mf.get_metric() {
                let label_pairs = m.get_label();
                if label_pairs.first().map(|p| p.get_value()) != Some(value) {
                    continue;
                }
                let h = m.get_histogram();
                total_count += h.get_sample_count();
                for (i, bucket) in h.get_bucket().iter().enumerate() {
                    match merged.get_mut(i) {
                        Some(entry) => entry.1 += bucket.get_cumulative_count(),
                        None => merged.push((bucket.get_upper_bound(), bucket.get_cumulative_count())),
                    }
                }
            }
        }

        if total_count == 0 {
            return LatencyPercentiles::default();
        }

        LatencyPercentiles {
            p50_ms: Self::percentile_from_buckets(&merged, total_count, 0.50),
            p95_ms: Self::percentile_from_buckets(&merged, total_count, 0.95),
            p99_ms: Self::percentile_from_buckets(&merged, total_count, 0.99),
        }
    }

    fn percentile_from_buckets(buckets: &[(f64, u64)], total_count: u64, percentile: f64) -> f64 {
        let target = (total_count as f64 * percentile) as u64;
        let mut prev_bound = 0.0;
        let mut prev_count = 0u64;

        for &(upper_bound, cumulative_count) in buckets {
            if cumulative_count >= target {
                let bucket_count = cumulative_count - prev_count;
                if bucket_count == 0 {
                    return upper_bound;
                }
                let position = (target - prev_count) as f64 / bucket_count as f64;
                return prev_bound + position * (upper_bound - prev_bound);
            }
            prev_bound = upper_bound;
            prev_count = cumulative_count;
        }

        buckets.last().map(|b| b.0).unwrap_or(0.0)
    }

    /// Log a human-readable rollup since the reporter was created.
    pub fn log_summary(&self) {
        let duration = Utc::now() - self.start_time;
        info!(
            "========== Ingestion summary ({}h{}m) ==========",
            duration.num_hours(),
            duration.num_minutes() % 60
        );
        for exchange in &self.exchanges {
            let fetch = self.fetch_latency(exchange);
            info!(
                "{exchange}: fetch latency p50={:.0}ms p95={:.0}ms p99={:.0}ms",
                fetch.p50_ms, fetch.p95_ms, fetch.p99_ms
            );
        }
        info!("==================================================");
    }
}
