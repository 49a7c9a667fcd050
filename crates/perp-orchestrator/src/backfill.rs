//! Historical REST backfill (C9 step 2).
//!
//! One job per `(venue, metric, symbol)`; jobs fan out across a bounded
//! concurrent pool with symbols split `direct`/`proxy`. The
//! Binance taker-volume unit is held back to run after every other unit so
//! its five-minute-to-one-minute redistribution can read the
//! OHLCV rows a prior pass of this same backfill already wrote.

use crate::error::{AppError, AppResult};
use crate::synthetic_index;
use futures_util::stream::{self, StreamExt};
use perp_core::{floor_to_minute, to_venue_symbol, Exchange, PerpSample, SymbolCase};
use perp_feed::{
    merge_partials, parse_kline, parse_long_short_ratio, parse_open_interest,
    parse_premium_funding_rate, redistribute_five_minute_taker_volume, OhlcvMinute,
};
use perp_fetch::{
    all_backfill_units, coinalyze_liquidation_config, jittered_page_delay, paginate,
    send_with_retry, BackfillUnit, ClientPool, ConnKind, EndpointConfig, FetchError, FetchStats,
    PageRow,
};
use perp_storage::StorageGateway;
use perp_telemetry::{Heartbeat, HeartbeatStatus, StatusSink, StructuredError};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Coinalyze's per-venue instrument suffix.
fn coinalyze_suffix(exchange: Exchange) -> &'static str {
    match exchange {
        Exchange::Binance => "A",
        Exchange::Bybit => "6",
        Exchange::Okx => "3",
    }
}

fn unit_config(exchange: Exchange, metric: &str) -> EndpointConfig {
    all_backfill_units()
        .into_iter()
        .find(|u| u.exchange == exchange && u.metric == metric)
        .map(|u| u.config)
        .expect("backfill unit must exist for every (exchange, metric) the orchestrator dispatches")
}

fn array_at(body: &Value, path: &[&str]) -> Vec<Value> {
    let mut cur = body;
    for key in path {
        cur = match cur.get(key) {
            Some(v) => v,
            None => return Vec::new(),
        };
    }
    cur.as_array().cloned().unwrap_or_default()
}

fn numeric_rows(
    body: Value,
    array_path: &[&str],
    ts_of: impl Fn(&Value) -> Option<i64>,
    value_of: impl Fn(&Value) -> Option<f64>,
) -> Vec<PageRow<f64>> {
    array_at(&body, array_path)
        .into_iter()
        .filter_map(|row| {
            let ts = ts_of(&row)?;
            let value = value_of(&row)?;
            Some(PageRow { ts, data: value })
        })
        .collect()
}

fn str_f64(v: &Value) -> Option<f64> {
    v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64())
}

fn five_consecutive_minutes(
    rows: &[(i64, Option<f64>, Option<f64>)],
    start: i64,
) -> Option<[OhlcvMinute; 5]> {
    let mut out = [OhlcvMinute { volume: 0.0, close: 0.0 }; 5];
    for (i, slot) in out.iter_mut().enumerate() {
        let ts = start + i as i64 * 60_000;
        let (_, v, c) = rows.iter().find(|(t, _, _)| *t == ts)?;
        *slot = OhlcvMinute { volume: (*v)?, close: (*c)? };
    }
    Some(out)
}

/// Assign the first `split` fraction of `total` symbols to `direct`, the
/// rest to `proxy`.
fn conn_kind_for(index: usize, total: usize, split: f64) -> ConnKind {
    if total == 0 {
        return ConnKind::Direct;
    }
    let direct_count = ((total as f64) * split).round() as usize;
    if index < direct_count {
        ConnKind::Direct
    } else {
        ConnKind::Proxy
    }
}

pub struct BackfillRunner<S: StatusSink> {
    client_pool: Arc<ClientPool>,
    gateway: Arc<StorageGateway>,
    status_sink: Arc<S>,
    stats: Arc<FetchStats>,
    window_start_ts: i64,
    now_ms: i64,
    coinalyze_key: Option<String>,
    mt_basket: Vec<String>,
}

impl<S: StatusSink> BackfillRunner<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_pool: Arc<ClientPool>,
        gateway: Arc<StorageGateway>,
        status_sink: Arc<S>,
        stats: Arc<FetchStats>,
        window_start_ts: i64,
        now_ms: i64,
        coinalyze_key: Option<String>,
        mt_basket: Vec<String>,
    ) -> Self {
        Self { client_pool, gateway, status_sink, stats, window_start_ts, now_ms, coinalyze_key, mt_basket }
    }

    /// Run every backfill unit over `symbols`, holding the Binance
    /// taker-volume unit back until every other unit (in particular Binance
    /// OHLCV) has landed.
    pub async fn run(&self, symbols: &[String], concurrency: usize, direct_proxy_split: f64) -> AppResult<()> {
        let units = all_backfill_units();
        let (held_back, first_pass): (Vec<BackfillUnit>, Vec<BackfillUnit>) =
            units.into_iter().partition(|u| u.metric == "tv");

        self.run_units(&first_pass, symbols, concurrency, direct_proxy_split).await?;
        self.run_units(&held_back, symbols, concurrency, direct_proxy_split).await?;
        self.run_coinalyze(symbols, concurrency, direct_proxy_split).await?;
        Ok(())
    }

    /// Continuous REST polling cadence for the metrics the WS feeds don't
    /// carry: open interest, long/short ratio, premium funding rate.
    /// OHLCV and taker volume stay
    /// WS-sourced once live, so this deliberately excludes the `ohlcv`/`tv`
    /// units that `run` covers during the historical pass.
    pub async fn run_polling_tick(&self, symbols: &[String], concurrency: usize, direct_proxy_split: f64) -> AppResult<()> {
        let units: Vec<BackfillUnit> = all_backfill_units()
            .into_iter()
            .filter(|u| matches!(u.metric, "oi" | "lsr" | "pfr"))
            .collect();
        self.run_units(&units, symbols, concurrency, direct_proxy_split).await
    }

    async fn run_units(
        &self,
        units: &[BackfillUnit],
        symbols: &[String],
        concurrency: usize,
        split: f64,
    ) -> AppResult<()> {
        if units.is_empty() || symbols.is_empty() {
            return Ok(());
        }
        let total = symbols.len();
        let jobs: Vec<(usize, BackfillUnit, String)> = units
            .iter()
            .flat_map(|u| symbols.iter().enumerate().map(move |(i, s)| (i, u.clone(), s.clone())))
            .collect();
        let job_count = jobs.len();

        let results = stream::iter(jobs)
            .map(|(i, unit, symbol)| {
                let conn_kind = conn_kind_for(i, total, split);
                async move { self.run_job(&unit, &symbol, conn_kind).await }
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        self.write_results(results).await?;
        info!(units = units.len(), symbols = total, jobs = job_count, "backfill pass complete");
        Ok(())
    }

    async fn write_results(&self, results: Vec<AppResult<Vec<PerpSample>>>) -> AppResult<()> {
        let mut all_rows = Vec::new();
        for result in results {
            match result {
                Ok(rows) => all_rows.extend(rows),
                Err(e) => {
                    warn!(error = %e, "backfill job failed, abandoning symbol");
                    self.status_sink
                        .error(StructuredError::new("backfill", "job_failed", e.to_string()))
                        .await;
                }
            }
        }
        if all_rows.is_empty() {
            return Ok(());
        }
        let mut merged = merge_partials(all_rows);
        let mt_rows = synthetic_index::derive_mt_rows(&merged, &self.mt_basket);
        merged.extend(mt_rows);
        self.gateway.upsert_samples(&merged).await?;
        self.status_sink
            .heartbeat(Heartbeat::new("backfill", 0, HeartbeatStatus::Running))
            .await;
        Ok(())
    }

    async fn run_job(&self, unit: &BackfillUnit, symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let venue_symbol = to_venue_symbol(symbol, unit.exchange, SymbolCase::Upper);
        match (unit.exchange, unit.metric) {
            (Exchange::Binance, "ohlcv") => self.backfill_binance_ohlcv(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Binance, "oi") => self.backfill_binance_oi(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Binance, "lsr") => self.backfill_binance_lsr(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Binance, "tv") => self.backfill_binance_tv(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Bybit, "ohlcv") => self.backfill_bybit_ohlcv(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Bybit, "oi") => self.backfill_bybit_oi(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Bybit, "lsr") => self.backfill_bybit_lsr(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Okx, "ohlcv") => self.backfill_okx_ohlcv(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Okx, "oi") => self.backfill_okx_oi(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Okx, "lsr") => self.backfill_okx_lsr(symbol, &venue_symbol, conn_kind).await,
            (Exchange::Okx, "pfr") => self.backfill_okx_pfr(symbol, &venue_symbol, conn_kind).await,
            (exchange, metric) => {
                warn!(%exchange, metric, "no backfill handler registered for unit, skipping");
                Ok(Vec::new())
            }
        }
    }

    async fn backfill_binance_ohlcv(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Binance, "ohlcv");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("symbol", venue_symbol),
                ("interval", "1m"),
                ("endTime", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "bin", "ohlcv", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(body
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|row| {
                    let ts = row.as_array().and_then(|r| r.first()).and_then(Value::as_f64)? as i64;
                    Some(PageRow { ts, data: row })
                })
                .collect::<Vec<_>>())
        })
        .await?;
        let mut samples: Vec<PerpSample> =
            rows.into_iter().filter_map(|r| parse_kline(Exchange::Binance, symbol, &r.data).ok()).collect();
        samples.sort_by_key(|s| s.ts);
        perp_feed::compute_rsi_series(&mut samples);
        Ok(samples)
    }

    async fn backfill_binance_oi(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Binance, "oi");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("symbol", venue_symbol),
                ("period", "5m"),
                ("endTime", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "bin", "oi", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(numeric_rows(
                body,
                &[],
                |r| r.get("timestamp").and_then(Value::as_i64),
                |r| r.get("sumOpenInterestValue").and_then(str_f64),
            ))
        })
        .await?;
        Ok(rows.into_iter().map(|r| parse_open_interest(Exchange::Binance, symbol, r.ts, r.data)).collect())
    }

    async fn backfill_binance_lsr(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Binance, "lsr");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("symbol", venue_symbol),
                ("period", "5m"),
                ("endTime", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "bin", "lsr", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(numeric_rows(
                body,
                &[],
                |r| r.get("timestamp").and_then(Value::as_i64),
                |r| r.get("longShortRatio").and_then(str_f64),
            ))
        })
        .await?;
        Ok(rows.into_iter().map(|r| parse_long_short_ratio(Exchange::Binance, symbol, r.ts, r.data)).collect())
    }

    /// Binance `takerlongshortRatio` is native 5-minute; redistributed across
    /// the five corresponding 1-minute OHLCV slots already in storage.
    async fn backfill_binance_tv(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Binance, "tv");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("symbol", venue_symbol),
                ("period", "5m"),
                ("endTime", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "bin", "tv", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(body
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|row| {
                    let ts = row.get("timestamp").and_then(Value::as_i64)?;
                    let buy = row.get("buyVol").and_then(str_f64)?;
                    let sell = row.get("sellVol").and_then(str_f64)?;
                    Some(PageRow { ts, data: (buy, sell) })
                })
                .collect::<Vec<_>>())
        })
        .await?;

        let mut samples = Vec::new();
        for row in rows {
            let bucket_start = floor_to_minute(row.ts);
            let five_min_start = bucket_start - bucket_start.rem_euclid(5 * 60_000);
            let ohlcv = self
                .gateway
                .ohlcv_window(symbol, Exchange::Binance, five_min_start, five_min_start + 4 * 60_000)
                .await?;
            let minutes = five_consecutive_minutes(&ohlcv, five_min_start);
            let (buy_total, sell_total) = row.data;
            let weights = redistribute_five_minute_taker_volume(buy_total, sell_total, minutes.as_ref());
            for (i, (tbv, tsv)) in weights.into_iter().enumerate() {
                let ts = five_min_start + i as i64 * 60_000;
                let mut sample = PerpSample::new(ts, symbol, Exchange::Binance, "bin-tv");
                sample.tbv = Some(tbv);
                sample.tsv = Some(tsv);
                samples.push(sample);
            }
        }
        Ok(samples)
    }

    async fn backfill_bybit_ohlcv(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Bybit, "ohlcv");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("category", "linear"),
                ("symbol", venue_symbol),
                ("interval", "1"),
                ("end", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "byb", "ohlcv", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(array_at(&body, &["result", "list"])
                .into_iter()
                .filter_map(|row| {
                    let ts: i64 = row.as_array().and_then(|r| r.first()).and_then(Value::as_str)?.parse().ok()?;
                    Some(PageRow { ts, data: row })
                })
                .collect::<Vec<_>>())
        })
        .await?;
        Ok(rows.into_iter().filter_map(|r| parse_kline(Exchange::Bybit, symbol, &r.data).ok()).collect())
    }

    async fn backfill_bybit_oi(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Bybit, "oi");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("category", "linear"),
                ("symbol", venue_symbol),
                ("intervalTime", "5min"),
                ("endTime", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "byb", "oi", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(numeric_rows(
                body,
                &["result", "list"],
                |r| r.get("timestamp").and_then(Value::as_str).and_then(|s| s.parse().ok()),
                |r| r.get("openInterest").and_then(str_f64),
            ))
        })
        .await?;
        Ok(rows.into_iter().map(|r| parse_open_interest(Exchange::Bybit, symbol, r.ts, r.data)).collect())
    }

    async fn backfill_bybit_lsr(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Bybit, "lsr");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("category", "linear"),
                ("symbol", venue_symbol),
                ("period", "5min"),
                ("endTime", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "byb", "lsr", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(array_at(&body, &["result", "list"])
                .into_iter()
                .filter_map(|row| {
                    let ts: i64 = row.get("timestamp").and_then(Value::as_str)?.parse().ok()?;
                    let buy: f64 = row.get("buyRatio").and_then(Value::as_str)?.parse().ok()?;
                    let sell: f64 = row.get("sellRatio").and_then(Value::as_str)?.parse().ok()?;
                    if sell == 0.0 {
                        return None;
                    }
                    Some(PageRow { ts, data: buy / sell })
                })
                .collect::<Vec<_>>())
        })
        .await?;
        Ok(rows.into_iter().map(|r| parse_long_short_ratio(Exchange::Bybit, symbol, r.ts, r.data)).collect())
    }

    async fn backfill_okx_ohlcv(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Okx, "ohlcv");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("instId", venue_symbol),
                ("bar", "1m"),
                ("after", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "okx", "ohlcv", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(array_at(&body, &["data"])
                .into_iter()
                .filter_map(|row| {
                    let ts: i64 = row.as_array().and_then(|r| r.first()).and_then(Value::as_str)?.parse().ok()?;
                    Some(PageRow { ts, data: row })
                })
                .collect::<Vec<_>>())
        })
        .await?;
        Ok(rows.into_iter().filter_map(|r| parse_kline(Exchange::Okx, symbol, &r.data).ok()).collect())
    }

    /// OKX's open-interest rubik endpoint returns contract count, not USD; a
    /// close-price multiplier from already-backfilled OHLCV resolves it to
    /// USD. A row with no resolvable close is
    /// skipped entirely rather than stored with a guessed price. The rubik
    /// family has no cursor parameter, so this is a single fetch rather than
    /// a backward-paged one (see DESIGN.md).
    async fn backfill_okx_oi(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Okx, "oi");
        let client = self.client_pool.get(conn_kind);
        jittered_page_delay(&unit, conn_kind).await;
        let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
            ("instId", venue_symbol),
            ("period", "5m"),
            ("limit", &unit.max_page_size.to_string()),
        ]);
        let resp = send_with_retry(req, &unit.retry, "okx", "oi", &self.stats, conn_kind).await?;
        let body: Value = resp.json().await.map_err(FetchError::from)?;

        let ohlcv = self.gateway.ohlcv_window(symbol, Exchange::Okx, self.window_start_ts, self.now_ms).await?;
        let close_at = |ts: i64| -> Option<f64> {
            let minute = floor_to_minute(ts);
            ohlcv.iter().find(|(t, _, _)| *t == minute).and_then(|(_, _, c)| *c)
        };

        let out = array_at(&body, &["data"])
            .into_iter()
            .filter_map(|row| {
                let arr = row.as_array()?;
                let ts: i64 = arr.first()?.as_str()?.parse().ok()?;
                let contracts: f64 = arr.get(1)?.as_str()?.parse().ok()?;
                let close = close_at(ts)?;
                Some(parse_open_interest(Exchange::Okx, symbol, ts, contracts * close))
            })
            .collect();
        Ok(out)
    }

    async fn backfill_okx_lsr(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Okx, "lsr");
        let client = self.client_pool.get(conn_kind);
        jittered_page_delay(&unit, conn_kind).await;
        let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
            ("instId", venue_symbol),
            ("period", "5m"),
            ("limit", &unit.max_page_size.to_string()),
        ]);
        let resp = send_with_retry(req, &unit.retry, "okx", "lsr", &self.stats, conn_kind).await?;
        let body: Value = resp.json().await.map_err(FetchError::from)?;
        let out = array_at(&body, &["data"])
            .into_iter()
            .filter_map(|row| {
                let arr = row.as_array()?;
                let ts: i64 = arr.first()?.as_str()?.parse().ok()?;
                let lsr: f64 = arr.get(1)?.as_str()?.parse().ok()?;
                Some(parse_long_short_ratio(Exchange::Okx, symbol, ts, lsr))
            })
            .collect();
        Ok(out)
    }

    /// The one endpoint whose pagination motivated the backward-paging
    /// algorithm in the first place.
    async fn backfill_okx_pfr(&self, symbol: &str, venue_symbol: &str, conn_kind: ConnKind) -> AppResult<Vec<PerpSample>> {
        let unit = unit_config(Exchange::Okx, "pfr");
        let client = self.client_pool.get(conn_kind);
        let rows = paginate(self.now_ms + 1, self.window_start_ts, unit.max_page_size, |after, limit| async move {
            jittered_page_delay(&unit, conn_kind).await;
            let req = client.get(unit.base_url).timeout(unit.timeout).query(&[
                ("instId", venue_symbol),
                ("after", &after.to_string()),
                ("limit", &limit.to_string()),
            ]);
            let resp = send_with_retry(req, &unit.retry, "okx", "pfr", &self.stats, conn_kind).await?;
            let body: Value = resp.json().await.map_err(FetchError::from)?;
            Ok(numeric_rows(
                body,
                &["data"],
                |r| r.get("ts").and_then(Value::as_str).and_then(|s| s.parse().ok()),
                |r| r.get("premium").and_then(Value::as_str).and_then(|s| s.parse().ok()),
            ))
        })
        .await?;
        Ok(rows.into_iter().map(|r| parse_premium_funding_rate(Exchange::Okx, symbol, r.ts, r.data)).collect())
    }

    async fn run_coinalyze(&self, symbols: &[String], concurrency: usize, split: f64) -> AppResult<()> {
        let Some(api_key) = self.coinalyze_key.clone() else {
            info!("COINALYZE_KEY not set, skipping liquidation-history backfill");
            return Ok(());
        };
        if symbols.is_empty() {
            return Ok(());
        }
        let total = symbols.len();
        let jobs: Vec<(usize, Exchange, String)> = Exchange::ALL
            .iter()
            .flat_map(|&ex| symbols.iter().enumerate().map(move |(i, s)| (i, ex, s.clone())))
            .collect();

        let results = stream::iter(jobs)
            .map(|(i, exchange, symbol)| {
                let conn_kind = conn_kind_for(i, total, split);
                let api_key = api_key.clone();
                async move { self.backfill_coinalyze(&symbol, exchange, conn_kind, &api_key).await }
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        self.write_results(results).await
    }

    async fn backfill_coinalyze(
        &self,
        symbol: &str,
        exchange: Exchange,
        conn_kind: ConnKind,
        api_key: &str,
    ) -> AppResult<Vec<PerpSample>> {
        let config = coinalyze_liquidation_config();
        let instrument = format!("{symbol}USDT_PERP.{}", coinalyze_suffix(exchange));
        let client = self.client_pool.get(conn_kind);
        jittered_page_delay(&config, conn_kind).await;

        let from_secs = (self.window_start_ts / 1000).to_string();
        let to_secs = (self.now_ms / 1000).to_string();
        let req = client.get(config.base_url).timeout(config.timeout).query(&[
            ("api_key", api_key),
            ("symbols", &instrument),
            ("interval", "1min"),
            ("from", &from_secs),
            ("to", &to_secs),
            ("convert_to_usd", "true"),
        ]);
        let resp = send_with_retry(req, &config.retry, exchange.tag(), "coinalyze-lq", &self.stats, conn_kind)
            .await
            .map_err(AppError::from)?;
        let body: Value = resp.json().await.map_err(FetchError::from)?;

        let history = body
            .as_array()
            .and_then(|a| a.first())
            .and_then(|o| o.get("history"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let tag = format!("{}-lq", exchange.tag());
        let out = history
            .into_iter()
            .filter_map(|row| {
                let ts = row.get("t").and_then(Value::as_i64)? * 1000;
                let long = row.get("l").and_then(Value::as_f64);
                let short = row.get("s").and_then(Value::as_f64);
                if long.is_none() && short.is_none() {
                    return None;
                }
                let mut sample = PerpSample::new(floor_to_minute(ts), symbol, exchange, tag.clone());
                sample.lql = long;
                sample.lqs = short;
                Some(sample)
            })
            .collect();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_kind_split_is_first_half_direct() {
        assert_eq!(conn_kind_for(0, 10, 0.5), ConnKind::Direct);
        assert_eq!(conn_kind_for(4, 10, 0.5), ConnKind::Direct);
        assert_eq!(conn_kind_for(5, 10, 0.5), ConnKind::Proxy);
        assert_eq!(conn_kind_for(9, 10, 0.5), ConnKind::Proxy);
    }

    #[test]
    fn conn_kind_split_handles_empty_universe() {
        assert_eq!(conn_kind_for(0, 0, 0.5), ConnKind::Direct);
    }

    #[test]
    fn array_at_walks_nested_path() {
        let body = serde_json::json!({"result": {"list": [1, 2, 3]}});
        assert_eq!(array_at(&body, &["result", "list"]).len(), 3);
        assert!(array_at(&body, &["missing"]).is_empty());
    }

    #[test]
    fn numeric_rows_skips_rows_missing_either_field() {
        let body = serde_json::json!([
            {"timestamp": 1, "sumOpenInterestValue": "10.5"},
            {"timestamp": 2},
        ]);
        let rows = numeric_rows(
            body,
            &[],
            |r| r.get("timestamp").and_then(Value::as_i64),
            |r| r.get("sumOpenInterestValue").and_then(str_f64),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, 10.5);
    }

    #[test]
    fn five_consecutive_minutes_requires_every_slot_present() {
        let rows = vec![(0, Some(1.0), Some(10.0)), (60_000, Some(1.0), Some(11.0))];
        assert!(five_consecutive_minutes(&rows, 0).is_none());
    }
}
