//! Unified storage gateway (C7) and derived-metrics engine (C8) for the
//! perp market-data pipeline, plus a Postgres-backed status sink (C10).

pub mod error;
pub mod gateway;
pub mod metrics_engine;
pub mod schema;
pub mod status_sink;

pub use error::{StorageError, StorageResult};
pub use gateway::{StorageGateway, MIN_CHUNK_SIZE};
pub use metrics_engine::DerivedMetricsEngine;
pub use status_sink::PostgresStatusSink;
