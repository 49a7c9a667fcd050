//! Idempotent schema initialization.
//!
//! Creates `perp_data` (the unified time-series hypertable), `perp_metrics`
//! (the derived-metrics table), and the two append-only log tables
//! `perp_status`/`perp_errors` if they don't already exist. TimescaleDB's
//! hypertable conversion is attempted but not required: a plain Postgres
//! table still satisfies every invariant, just without
//! native time-partitioning — useful for tests and for operators running
//! against vanilla Postgres.

use crate::error::StorageResult;
use perp_core::{CHANGE_METRICS, WINDOWS};
use sqlx::PgPool;
use tracing::{info, warn};

const RAW_NUMERIC_COLUMNS: &[&str] = &[
    "o", "h", "l", "c", "v", "oi", "pfr", "lsr", "rsi1", "rsi60", "tbv", "tsv", "lql", "lqs",
];

pub async fn init(pool: &PgPool) -> StorageResult<()> {
    create_perp_data(pool).await?;
    create_perp_metrics(pool).await?;
    create_status_tables(pool).await?;
    try_hypertable(pool).await;
    Ok(())
}

async fn create_perp_data(pool: &PgPool) -> StorageResult<()> {
    let columns: String = RAW_NUMERIC_COLUMNS
        .iter()
        .map(|c| format!("{c} DOUBLE PRECISION"))
        .collect::<Vec<_>>()
        .join(",\n            ");

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS perp_data (
            ts BIGINT NOT NULL,
            symbol TEXT NOT NULL,
            exchange TEXT NOT NULL,
            perpspec JSONB NOT NULL DEFAULT '[]'::jsonb,
            {columns},
            notes TEXT,
            PRIMARY KEY (ts, symbol, exchange)
        )"
    );
    sqlx::query(&sql).execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS perp_data_symbol_idx ON perp_data (symbol)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS perp_data_exchange_idx ON perp_data (exchange)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_perp_metrics(pool: &PgPool) -> StorageResult<()> {
    let mut columns: Vec<String> =
        RAW_NUMERIC_COLUMNS.iter().map(|c| format!("{c} DOUBLE PRECISION")).collect();
    for metric in CHANGE_METRICS {
        for window in WINDOWS {
            columns.push(format!("{metric}_chg_{window}m DOUBLE PRECISION"));
        }
    }
    for window in WINDOWS {
        columns.push(format!("lqside_chg_{window}m TEXT"));
    }
    let columns = columns.join(",\n            ");

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS perp_metrics (
            ts BIGINT NOT NULL,
            symbol TEXT NOT NULL,
            exchange TEXT NOT NULL,
            {columns},
            PRIMARY KEY (ts, symbol, exchange)
        )"
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

async fn create_status_tables(pool: &PgPool) -> StorageResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pipeline_heartbeats (
            id BIGSERIAL PRIMARY KEY,
            component TEXT NOT NULL,
            cadence_secs BIGINT NOT NULL,
            status TEXT NOT NULL,
            at TIMESTAMPTZ NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pipeline_errors (
            id BIGSERIAL PRIMARY KEY,
            component TEXT NOT NULL,
            error_type TEXT NOT NULL,
            code TEXT,
            message TEXT NOT NULL,
            details JSONB,
            at TIMESTAMPTZ NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Best-effort TimescaleDB hypertable conversion. A missing extension is not
/// fatal — `perp_data` stays a regular table and retention falls back to the
/// gateway's explicit `DELETE` sweep.
async fn try_hypertable(pool: &PgPool) {
    if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS timescaledb").execute(pool).await {
        warn!(error = %e, "timescaledb extension unavailable, perp_data stays a plain table");
        return;
    }
    let result = sqlx::query(
        "SELECT create_hypertable('perp_data', 'ts', chunk_time_interval => 86400000, if_not_exists => true, migrate_data => true)",
    )
    .execute(pool)
    .await;
    match result {
        Ok(_) => info!("perp_data converted to a timescaledb hypertable"),
        Err(e) => warn!(error = %e, "hypertable conversion failed, continuing on a plain table"),
    }
}
