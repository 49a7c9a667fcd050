//! Postgres-backed [`StatusSink`] (C10): appends to `pipeline_heartbeats`
//! and `pipeline_errors`. Per the trait's contract, a write failure is
//! logged and swallowed — a flaky status sink must never stall a collector
//! or fetcher.

use perp_telemetry::{Heartbeat, StatusSink, StructuredError};
use sqlx::PgPool;
use tracing::warn;

pub struct PostgresStatusSink {
    pool: PgPool,
}

impl PostgresStatusSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl StatusSink for PostgresStatusSink {
    async fn heartbeat(&self, beat: Heartbeat) {
        let result = sqlx::query(
            "INSERT INTO pipeline_heartbeats (component, cadence_secs, status, at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&beat.component)
        .bind(beat.cadence_secs as i64)
        .bind(format!("{:?}", beat.status).to_lowercase())
        .bind(beat.at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, component = %beat.component, "failed to persist heartbeat, dropping");
        }
    }

    async fn error(&self, err: StructuredError) {
        let result = sqlx::query(
            "INSERT INTO pipeline_errors (component, error_type, code, message, details, at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&err.component)
        .bind(&err.error_type)
        .bind(&err.code)
        .bind(&err.message)
        .bind(&err.details)
        .bind(err.at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, component = %err.component, "failed to persist structured error, dropping");
        }
    }
}
