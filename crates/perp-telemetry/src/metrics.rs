//! Prometheus metrics for the perp market-data pipeline.
//!
//! Covers every component the orchestrator wires up: the REST fetcher, the
//! WebSocket collectors, the minute-bucket aggregator, the storage gateway,
//! and the derived-metrics engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails
//! (e.g. a duplicate metric name) that's a fatal startup misconfiguration, and
//! it should crash immediately rather than run with half-registered metrics.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge_vec,
    CounterVec, GaugeVec, HistogramVec, IntGaugeVec,
};

// =============================================================================
// C4: WebSocket collector
// =============================================================================

/// Collector state machine current state, one gauge series per
/// (exchange, channel, state); only the active state is 1.
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "perp_ws_state",
        "WebSocket collector state machine current state (1=active)",
        &["exchange", "channel", "state"]
    )
    .unwrap()
});

/// Total WebSocket reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["exchange", "channel", "reason"]
    )
    .unwrap()
});

/// Total confirmed candle messages received.
pub static WS_CANDLES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_ws_candles_total",
        "Total confirmed-candle messages received over WebSocket",
        &["exchange", "symbol"]
    )
    .unwrap()
});

/// Total unconfirmed (in-progress) candle messages dropped.
pub static WS_CANDLES_DROPPED_UNCONFIRMED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_ws_candles_dropped_unconfirmed_total",
        "Total candle messages dropped for not being confirmed/closed",
        &["exchange", "symbol"]
    )
    .unwrap()
});

/// Feed message latency, from exchange event time to local receipt.
pub static FEED_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_feed_latency_ms",
        "Feed message latency in milliseconds",
        &["exchange", "channel"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

// =============================================================================
// C3: Rate-limited fetcher
// =============================================================================

/// Total REST requests issued.
pub static FETCH_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_fetch_requests_total",
        "Total REST requests issued by the fetcher",
        &["exchange", "endpoint"]
    )
    .unwrap()
});

/// Total REST requests that were throttled or failed transiently and were
/// retried. `cause` distinguishes `rate_limit` (429/418) from `transient`
/// (5xx/timeout) so the two can later be split into separate counters without
/// a metric rename.
pub static FETCH_RETRY_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_fetch_retry_total",
        "Total REST requests retried after a rate-limit or transient failure",
        &["exchange", "endpoint", "cause"]
    )
    .unwrap()
});

/// REST request latency.
pub static FETCH_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_fetch_latency_ms",
        "REST request latency in milliseconds",
        &["exchange", "endpoint"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Rows fetched per backfill page.
pub static FETCH_PAGE_ROWS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_fetch_page_rows",
        "Rows returned per backfill page",
        &["exchange", "endpoint"],
        vec![1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 1500.0]
    )
    .unwrap()
});

// =============================================================================
// C5/C6: Minute bucket aggregator and row merger
// =============================================================================

/// Total minute-bucket flushes.
pub static BUCKET_FLUSH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_bucket_flush_total",
        "Total minute-bucket flushes",
        &["exchange", "kind"]
    )
    .unwrap()
});

/// Current number of open (unflushed) buckets.
pub static BUCKET_OPEN: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "perp_bucket_open",
        "Current number of open minute buckets",
        &["exchange", "kind"]
    )
    .unwrap()
});

/// Total 5-minute-to-1-minute trade volume redistributions performed.
pub static BUCKET_REDISTRIBUTION_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_bucket_redistribution_total",
        "Total 5m-to-1m volume redistributions, by method",
        &["exchange", "method"]
    )
    .unwrap()
});

/// Number of partial samples folded into a merged row.
pub static MERGE_BATCH_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_merge_batch_size",
        "Number of partial samples merged per (ts, symbol, exchange) row",
        &["exchange"],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 12.0]
    )
    .unwrap()
});

// =============================================================================
// C7: Storage gateway
// =============================================================================

/// Rows written per upsert chunk.
pub static STORAGE_CHUNK_ROWS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_storage_chunk_rows",
        "Rows written per storage upsert chunk",
        &["table"],
        vec![100.0, 500.0, 1000.0, 2500.0, 5000.0, 7500.0, 10000.0]
    )
    .unwrap()
});

/// Storage chunk write latency.
pub static STORAGE_CHUNK_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_storage_chunk_latency_ms",
        "Storage upsert chunk latency in milliseconds",
        &["table"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Total chunk write retries after a failed attempt.
pub static STORAGE_CHUNK_RETRY_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perp_storage_chunk_retry_total",
        "Total storage chunk write retries",
        &["table"]
    )
    .unwrap()
});

// =============================================================================
// C8: Derived-metrics engine
// =============================================================================

/// Derived-metrics engine run duration.
pub static DERIVED_RUN_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_derived_run_duration_ms",
        "Derived-metrics engine run duration in milliseconds",
        &["exchange"],
        vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0]
    )
    .unwrap()
});

/// Rows updated per derived-metrics run.
pub static DERIVED_ROWS_UPDATED: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perp_derived_rows_updated",
        "Rows updated per derived-metrics engine run",
        &["exchange"],
        vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the collector state machine state. Only the active state should be
    /// set to 1, all others to 0.
    pub fn ws_state_set(exchange: &str, channel: &str, state: &str) {
        for s in &[
            "disconnected",
            "connecting",
            "subscribing",
            "streaming",
            "draining",
            "reconnecting",
        ] {
            WS_STATE.with_label_values(&[exchange, channel, s]).set(0.0);
        }
        WS_STATE.with_label_values(&[exchange, channel, state]).set(1.0);
    }

    pub fn ws_reconnect(exchange: &str, channel: &str, reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[exchange, channel, reason]).inc();
    }

    pub fn ws_candle_received(exchange: &str, symbol: &str) {
        WS_CANDLES_TOTAL.with_label_values(&[exchange, symbol]).inc();
    }

    pub fn ws_candle_dropped_unconfirmed(exchange: &str, symbol: &str) {
        WS_CANDLES_DROPPED_UNCONFIRMED_TOTAL
            .with_label_values(&[exchange, symbol])
            .inc();
    }

    pub fn feed_latency(exchange: &str, channel: &str, latency_ms: f64) {
        FEED_LATENCY_MS.with_label_values(&[exchange, channel]).observe(latency_ms);
    }

    pub fn fetch_request(exchange: &str, endpoint: &str) {
        FETCH_REQUESTS_TOTAL.with_label_values(&[exchange, endpoint]).inc();
    }

    pub fn fetch_retry(exchange: &str, endpoint: &str, cause: &str) {
        FETCH_RETRY_TOTAL.with_label_values(&[exchange, endpoint, cause]).inc();
    }

    pub fn fetch_latency(exchange: &str, endpoint: &str, latency_ms: f64) {
        FETCH_LATENCY_MS.with_label_values(&[exchange, endpoint]).observe(latency_ms);
    }

    pub fn fetch_page_rows(exchange: &str, endpoint: &str, rows: f64) {
        FETCH_PAGE_ROWS.with_label_values(&[exchange, endpoint]).observe(rows);
    }

    pub fn bucket_flush(exchange: &str, kind: &str) {
        BUCKET_FLUSH_TOTAL.with_label_values(&[exchange, kind]).inc();
    }

    pub fn bucket_open_set(exchange: &str, kind: &str, count: i64) {
        BUCKET_OPEN.with_label_values(&[exchange, kind]).set(count);
    }

    pub fn bucket_redistribution(exchange: &str, method: &str) {
        BUCKET_REDISTRIBUTION_TOTAL.with_label_values(&[exchange, method]).inc();
    }

    pub fn merge_batch_size(exchange: &str, size: f64) {
        MERGE_BATCH_SIZE.with_label_values(&[exchange]).observe(size);
    }

    pub fn storage_chunk_written(table: &str, rows: f64, latency_ms: f64) {
        STORAGE_CHUNK_ROWS.with_label_values(&[table]).observe(rows);
        STORAGE_CHUNK_LATENCY_MS.with_label_values(&[table]).observe(latency_ms);
    }

    pub fn storage_chunk_retry(table: &str) {
        STORAGE_CHUNK_RETRY_TOTAL.with_label_values(&[table]).inc();
    }

    pub fn derived_run(exchange: &str, duration_ms: f64, rows_updated: f64) {
        DERIVED_RUN_DURATION_MS.with_label_values(&[exchange]).observe(duration_ms);
        DERIVED_ROWS_UPDATED.with_label_values(&[exchange]).observe(rows_updated);
    }
}
