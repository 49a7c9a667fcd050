//! Derived-metrics engine (C8): recomputes percent-change
//! features over 1/5/10-minute positional lookback windows and writes them
//! to `perp_metrics`, guarded by the `c_chg_1m` detect column so a populated
//! row is never overwritten by a later recompute.

use crate::error::StorageResult;
use perp_core::{
    liquidation_side_majority, percent_change, Exchange, LiqSide, MinuteLiquidation,
    SYNTHETIC_MARKET_SYMBOL, CHANGE_METRICS, WINDOWS,
};
use perp_telemetry::Metrics;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;

/// Venue-specific metrics nulled out for the synthetic `MT` symbol, the
/// subset of [`CHANGE_METRICS`] that isn't also an OHLCV-like field.
const VENUE_SPECIFIC_METRICS: &[&str] = &["oi", "pfr", "lsr", "lql", "lqs"];

/// Head-room beyond the 10-day/10-minute lookback window, covering the longest lookback calc.
const LOOKBACK_HEADROOM_MS: i64 = 15 * 60 * 1000;
const LOOKBACK_WINDOW_MS: i64 = 10 * 24 * 60 * 60 * 1000;

struct DataRow {
    ts: i64,
    values: HashMap<&'static str, Option<f64>>,
}

pub struct DerivedMetricsEngine {
    pool: PgPool,
}

impl DerivedMetricsEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs over every `(symbol, exchange)` pair present in `perp_data`,
    /// intended for the initial full backfill pass.
    pub async fn run_full_backfill(&self, now_ms: i64) -> StorageResult<usize> {
        let start = std::time::Instant::now();
        let pairs: Vec<PgRow> =
            sqlx::query("SELECT DISTINCT symbol, exchange FROM perp_data").fetch_all(&self.pool).await?;
        let mut total = 0usize;
        for row in pairs {
            let symbol: String = row.get("symbol");
            let exchange_str: String = row.get("exchange");
            let Ok(exchange) = Exchange::from_str(&exchange_str) else { continue };
            let n = self.process_symbol_exchange(&symbol, exchange, now_ms).await?;
            total += n;
            Metrics::derived_run(exchange.tag(), start.elapsed().as_secs_f64() * 1000.0, n as f64);
        }
        info!(rows = total, "derived-metrics full backfill complete");
        Ok(total)
    }

    /// Incremental pass on the engine's steady-state cadence.
    pub async fn run_incremental(&self, now_ms: i64) -> StorageResult<usize> {
        self.run_full_backfill(now_ms).await
    }

    async fn process_symbol_exchange(
        &self,
        symbol: &str,
        exchange: Exchange,
        now_ms: i64,
    ) -> StorageResult<usize> {
        let window_start = now_ms - LOOKBACK_WINDOW_MS - LOOKBACK_HEADROOM_MS;
        let rows: Vec<PgRow> = sqlx::query(
            "SELECT ts, o, h, l, c, v, oi, pfr, lsr, rsi1, rsi60, tbv, tsv, lql, lqs \
             FROM perp_data WHERE symbol = $1 AND exchange = $2 AND ts >= $3 ORDER BY ts ASC",
        )
        .bind(symbol)
        .bind(exchange.to_string())
        .bind(window_start)
        .fetch_all(&self.pool)
        .await?;

        let is_mt = symbol == SYNTHETIC_MARKET_SYMBOL;
        let data: Vec<DataRow> = rows
            .iter()
            .map(|r| {
                let mut values = HashMap::new();
                for col in ["o", "h", "l", "c", "v", "oi", "pfr", "lsr", "rsi1", "rsi60", "tbv", "tsv", "lql", "lqs"] {
                    values.insert(col, r.try_get::<Option<f64>, _>(col).ok().flatten());
                }
                DataRow { ts: r.get("ts"), values }
            })
            .collect();

        if data.is_empty() {
            return Ok(0);
        }

        // Every row in the window is rewritten on every run: raw mirror columns are
        // unconditionally refreshed, while the `_chg_` columns carry their own
        // per-column `c_chg_1m IS NULL` guard in the upsert's ON CONFLICT clause
        // (see `upsert_metric_row`), so a populated row's change features survive
        // even though the row itself is touched every pass.
        let max_window = *WINDOWS.iter().max().unwrap() as usize;
        let mut written = 0usize;
        for i in 0..data.len() {
            self.upsert_metric_row(symbol, exchange, &data, i, is_mt, max_window).await?;
            written += 1;
        }
        Ok(written)
    }

    async fn upsert_metric_row(
        &self,
        symbol: &str,
        exchange: Exchange,
        data: &[DataRow],
        i: usize,
        is_mt: bool,
        max_window: usize,
    ) -> StorageResult<()> {
        build_upsert_query(symbol, exchange, data, i, is_mt, max_window).build().execute(&self.pool).await?;
        Ok(())
    }
}

/// Builds the `perp_metrics` upsert for row `i` of `data` without executing
/// it, so the `ON CONFLICT` text (in particular the `c_chg_1m`-guarded `CASE
/// WHEN` on every `_chg_` column) can be asserted against directly.
fn build_upsert_query<'a>(
    symbol: &'a str,
    exchange: Exchange,
    data: &'a [DataRow],
    i: usize,
    is_mt: bool,
    max_window: usize,
) -> QueryBuilder<'a, sqlx::Postgres> {
    let row = &data[i];

    let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("INSERT INTO perp_metrics (ts, symbol, exchange, o, h, l, c, v, oi, pfr, lsr, rsi1, rsi60, tbv, tsv, lql, lqs");
    for metric in CHANGE_METRICS {
        for window in WINDOWS {
            builder.push(format!(", {metric}_chg_{window}m"));
        }
    }
    for window in WINDOWS {
        builder.push(format!(", lqside_chg_{window}m"));
    }
    builder.push(") VALUES (");
    builder.push_bind(row.ts);
    builder.push(", ");
    builder.push_bind(symbol);
    builder.push(", ");
    builder.push_bind(exchange.to_string());
    for col in ["o", "h", "l", "c", "v", "oi", "pfr", "lsr", "rsi1", "rsi60", "tbv", "tsv", "lql", "lqs"] {
        builder.push(", ");
        builder.push_bind(row.values.get(col).copied().flatten());
    }
    for metric in CHANGE_METRICS {
        let skip = is_mt && VENUE_SPECIFIC_METRICS.contains(&metric);
        for window in WINDOWS {
            let chg = if skip {
                None
            } else {
                let w = window as usize;
                if i >= w {
                    percent_change(
                        row.values.get(metric).copied().flatten(),
                        data[i - w].values.get(metric).copied().flatten(),
                    )
                } else {
                    None
                }
            };
            builder.push(", ");
            builder.push_bind(chg);
        }
    }
    for window in WINDOWS {
        let w = window as usize;
        let side = if is_mt {
            None
        } else if i + 1 >= w {
            let start = i + 1 - w.min(max_window);
            let minutes: Vec<MinuteLiquidation> = data[start..=i]
                .iter()
                .map(|d| MinuteLiquidation {
                    lql: d.values.get("lql").copied().flatten(),
                    lqs: d.values.get("lqs").copied().flatten(),
                })
                .collect();
            liquidation_side_majority(&minutes)
        } else {
            None
        };
        builder.push(", ");
        builder.push_bind(side.map(LiqSide::as_str));
    }
    builder.push(") ON CONFLICT (ts, symbol, exchange) DO UPDATE SET ");
    builder.push("o = EXCLUDED.o, h = EXCLUDED.h, l = EXCLUDED.l, c = EXCLUDED.c, v = EXCLUDED.v, oi = EXCLUDED.oi, pfr = EXCLUDED.pfr, lsr = EXCLUDED.lsr, rsi1 = EXCLUDED.rsi1, rsi60 = EXCLUDED.rsi60, tbv = EXCLUDED.tbv, tsv = EXCLUDED.tsv, lql = EXCLUDED.lql, lqs = EXCLUDED.lqs");
    for metric in CHANGE_METRICS {
        for window in WINDOWS {
            let col = format!("{metric}_chg_{window}m");
            builder.push(format!(
                ", {col} = CASE WHEN perp_metrics.c_chg_1m IS NULL THEN EXCLUDED.{col} ELSE perp_metrics.{col} END"
            ));
        }
    }
    for window in WINDOWS {
        let col = format!("lqside_chg_{window}m");
        builder.push(format!(
            ", {col} = CASE WHEN perp_metrics.c_chg_1m IS NULL THEN EXCLUDED.{col} ELSE perp_metrics.{col} END"
        ));
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data_row(ts: i64, close: f64) -> DataRow {
        let mut values: HashMap<&'static str, Option<f64>> = HashMap::new();
        values.insert("c", Some(close));
        DataRow { ts, values }
    }

    #[test]
    fn detect_column_guard_preserves_chg_columns_but_refreshes_raw() {
        let data = vec![sample_data_row(0, 1.0), sample_data_row(60_000, 1.1)];
        let builder = build_upsert_query("BTC", Exchange::Binance, &data, 1, false, 10);
        let sql = builder.sql();
        assert!(sql.contains("c = EXCLUDED.c"));
        assert!(sql.contains(
            "c_chg_1m = CASE WHEN perp_metrics.c_chg_1m IS NULL THEN EXCLUDED.c_chg_1m ELSE perp_metrics.c_chg_1m END"
        ));
    }

    #[test]
    fn mt_symbol_skips_venue_specific_change_columns() {
        let data = vec![sample_data_row(0, 1.0), sample_data_row(60_000, 1.1)];
        let builder = build_upsert_query(SYNTHETIC_MARKET_SYMBOL, Exchange::Binance, &data, 1, true, 10);
        let sql = builder.sql();
        assert!(sql.contains("oi_chg_1m = CASE WHEN perp_metrics.c_chg_1m IS NULL"));
    }
}
