//! Storage gateway: chunked bulk upsert of [`PerpSample`] rows
//! into `perp_data`, additive on every column so repeated partial writes for
//! the same `(ts, symbol, exchange)` key never clobber a field another
//! source already populated.

use crate::error::{StorageError, StorageResult};
use perp_core::PerpSample;
use perp_telemetry::Metrics;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::warn;

/// Below this, a single `INSERT ... ON CONFLICT` round trip is cheap enough
/// that chunking would only add overhead.
pub const MIN_CHUNK_SIZE: usize = 5000;

const DATA_COLUMNS: &[&str] =
    &["o", "h", "l", "c", "v", "oi", "pfr", "lsr", "rsi1", "rsi60", "tbv", "tsv", "lql", "lqs"];

pub struct StorageGateway {
    pool: PgPool,
    chunk_size: usize,
}

impl StorageGateway {
    pub async fn connect(dsn: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(dsn).await?;
        Ok(Self { pool, chunk_size: MIN_CHUNK_SIZE })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool, chunk_size: MIN_CHUNK_SIZE }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> StorageResult<()> {
        crate::schema::init(&self.pool).await
    }

    /// Upserts `rows` in chunks of at least [`Self::with_chunk_size`] rows.
    /// A chunk that fails is retried once; a chunk that fails twice is
    /// surfaced as [`StorageError::ChunkFailed`] and the remaining chunks
    /// still run so one bad chunk doesn't stall the whole batch.
    pub async fn upsert_samples(&self, rows: &[PerpSample]) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut last_err = None;
        for chunk in rows.chunks(self.chunk_size) {
            let start = std::time::Instant::now();
            if let Err(e) = self.upsert_chunk(chunk).await {
                warn!(error = %e, rows = chunk.len(), "perp_data chunk upsert failed, retrying once");
                Metrics::storage_chunk_retry("perp_data");
                if let Err(e2) = self.upsert_chunk(chunk).await {
                    last_err = Some(StorageError::ChunkFailed {
                        table: "perp_data",
                        rows: chunk.len(),
                        source: e2,
                    });
                    continue;
                }
            }
            Metrics::storage_chunk_written(
                "perp_data",
                chunk.len() as f64,
                start.elapsed().as_secs_f64() * 1000.0,
            );
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn upsert_chunk(&self, chunk: &[PerpSample]) -> Result<(), sqlx::Error> {
        build_upsert_query(chunk).build().execute(&self.pool).await?;
        Ok(())
    }

    /// Deletes rows older than `cutoff_ts` (millis). Stands in for
    /// TimescaleDB's native retention policy, which doesn't apply cleanly to
    /// the bigint-millis `ts` column used here.
    pub async fn retention_sweep(&self, cutoff_ts: i64) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM perp_data WHERE ts < $1")
            .bind(cutoff_ts)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn distinct_symbol_exchange_pairs(&self) -> StorageResult<Vec<(String, String)>> {
        let rows: Vec<PgRow> =
            sqlx::query("SELECT DISTINCT symbol, exchange FROM perp_data").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| (r.get("symbol"), r.get("exchange"))).collect())
    }

    /// `(ts, v, c)` triples already in storage for one symbol/exchange over a
    /// window, ordered by `ts` ascending. Feeds the taker-volume redistribution
    /// join and the OKX open-interest close-price multiplier, both of which
    /// need OHLCV rows that a prior backfill pass already wrote.
    pub async fn ohlcv_window(
        &self,
        symbol: &str,
        exchange: perp_core::Exchange,
        start_ts: i64,
        end_ts: i64,
    ) -> StorageResult<Vec<(i64, Option<f64>, Option<f64>)>> {
        let rows: Vec<PgRow> = sqlx::query(
            "SELECT ts, v, c FROM perp_data WHERE symbol = $1 AND exchange = $2 AND ts >= $3 AND ts <= $4 ORDER BY ts ASC",
        )
        .bind(symbol)
        .bind(exchange.to_string())
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| (r.get("ts"), r.get("v"), r.get("c"))).collect())
    }
}

/// Builds the `perp_data` upsert for `chunk` without executing it, so the
/// `COALESCE(EXCLUDED.col, perp_data.col)` additive-merge text can be
/// asserted against directly.
fn build_upsert_query(chunk: &[PerpSample]) -> QueryBuilder<sqlx::Postgres> {
    let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        "INSERT INTO perp_data (ts, symbol, exchange, perpspec, o, h, l, c, v, oi, pfr, lsr, rsi1, rsi60, tbv, tsv, lql, lqs, notes) ",
    );
    builder.push_values(chunk, |mut b, row| {
        let perpspec = serde_json::Value::Array(
            row.perpspec.iter().cloned().map(serde_json::Value::String).collect(),
        );
        b.push_bind(row.ts)
            .push_bind(&row.symbol)
            .push_bind(row.exchange.to_string())
            .push_bind(perpspec)
            .push_bind(row.o)
            .push_bind(row.h)
            .push_bind(row.l)
            .push_bind(row.c)
            .push_bind(row.v)
            .push_bind(row.oi)
            .push_bind(row.pfr)
            .push_bind(row.lsr)
            .push_bind(row.rsi1)
            .push_bind(row.rsi60)
            .push_bind(row.tbv)
            .push_bind(row.tsv)
            .push_bind(row.lql)
            .push_bind(row.lqs)
            .push_bind(&row.notes);
    });
    builder.push(
        " ON CONFLICT (ts, symbol, exchange) DO UPDATE SET \
          perpspec = (SELECT jsonb_agg(DISTINCT x) FROM jsonb_array_elements_text(perp_data.perpspec || EXCLUDED.perpspec) x), ",
    );
    for (i, col) in DATA_COLUMNS.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(format!("{col} = COALESCE(EXCLUDED.{col}, perp_data.{col})"));
    }
    builder.push(", notes = COALESCE(EXCLUDED.notes, perp_data.notes)");
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_floor_is_one() {
        let gw = StorageGateway { pool: PgPool::connect_lazy("postgres://x").unwrap(), chunk_size: 5000 };
        let gw = gw.with_chunk_size(0);
        assert_eq!(gw.chunk_size, 1);
    }

    #[test]
    fn upsert_query_coalesces_every_data_column() {
        let chunk = vec![PerpSample::new(0, "BTC", perp_core::Exchange::Binance, "bin-ohlcv")];
        let builder = build_upsert_query(&chunk);
        let sql = builder.sql();
        for col in DATA_COLUMNS {
            assert!(
                sql.contains(&format!("{col} = COALESCE(EXCLUDED.{col}, perp_data.{col})")),
                "missing COALESCE merge for column {col}"
            );
        }
        assert!(sql.contains("notes = COALESCE(EXCLUDED.notes, perp_data.notes)"));
    }
}
