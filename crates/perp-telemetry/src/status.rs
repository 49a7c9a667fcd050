//! Status/error log sink types (C10).
//!
//! These are the shapes persisted by the two append-only tables the storage
//! gateway maintains — `pipeline_heartbeats` and `pipeline_errors` — kept here
//! rather than in `perp-storage` so every producer (fetcher, WS collector,
//! aggregator, orchestrator) can depend on the types without depending on the
//! database crate. A sink must never let a logging failure propagate back into
//! the producer's own control flow: see [`StatusSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a component, reported on a cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Started,
    Running,
    Connected,
    Stopped,
    Completed,
    Error,
}

/// One row of the heartbeat table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub component: String,
    pub cadence_secs: u64,
    pub status: HeartbeatStatus,
    pub at: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(component: impl Into<String>, cadence_secs: u64, status: HeartbeatStatus) -> Self {
        Self {
            component: component.into(),
            cadence_secs,
            status,
            at: Utc::now(),
        }
    }
}

/// One row of the structured error table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub component: String,
    pub error_type: String,
    pub code: Option<String>,
    pub message: String,
    pub details: Option<Value>,
    pub at: DateTime<Utc>,
}

impl StructuredError {
    pub fn new(component: impl Into<String>, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            error_type: error_type.into(),
            code: None,
            message: message.into(),
            details: None,
            at: Utc::now(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Sink for heartbeats and structured errors.
///
/// Implementations (the Postgres-backed one lives in `perp-storage`) must be
/// best-effort: a failed write is logged via `tracing` and swallowed, never
/// propagated — a dead status sink must not take down a collector or fetcher.
/// Callers take this as a generic bound rather than a trait object, since the
/// pipeline only ever runs one sink implementation at a time per process.
pub trait StatusSink: Send + Sync {
    fn heartbeat(&self, beat: Heartbeat) -> impl std::future::Future<Output = ()> + Send;
    fn error(&self, err: StructuredError) -> impl std::future::Future<Output = ()> + Send;
}

/// A [`StatusSink`] that only logs via `tracing`, for tests and for running
/// without a configured storage backend.
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    async fn heartbeat(&self, beat: Heartbeat) {
        tracing::debug!(
            component = %beat.component,
            status = ?beat.status,
            cadence_secs = beat.cadence_secs,
            "heartbeat"
        );
    }

    async fn error(&self, err: StructuredError) {
        tracing::warn!(
            component = %err.component,
            error_type = %err.error_type,
            code = ?err.code,
            message = %err.message,
            "structured error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracing_sink_never_panics() {
        let sink = TracingStatusSink;
        sink.heartbeat(Heartbeat::new("fetcher", 60, HeartbeatStatus::Running))
            .await;
        sink.error(StructuredError::new("fetcher", "rate_limit", "429 from binance")).await;
    }
}
