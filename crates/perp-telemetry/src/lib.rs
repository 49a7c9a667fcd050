//! Prometheus metrics, structured logging, and the status/error sink for the
//! perp market-data pipeline.
//!
//! - Prometheus metrics for the fetcher, WS collectors, aggregator, storage
//!   gateway, and derived-metrics engine
//! - Structured JSON logging with `tracing`
//! - A human-readable periodic ingestion summary
//! - [`status`]: heartbeat/structured-error types for C10, the status/error
//!   log sink (the Postgres-backed writer lives in `perp-storage`)

pub mod error;
pub mod logging;
pub mod metrics;
pub mod status;
pub mod summary;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use status::{Heartbeat, HeartbeatStatus, StatusSink, StructuredError, TracingStatusSink};
pub use summary::{IngestionSummaryReporter, LatencyPercentiles};
