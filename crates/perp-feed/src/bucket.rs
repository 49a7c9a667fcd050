//! Minute bucket aggregator (C5).
//!
//! Maintains `map<(exchange,symbol,minuteStart) -> bucket>` for the two
//! event-stream shapes that need in-memory accumulation before they become a
//! [`PerpSample`]: taker trades (TBV/TSV) and forced liquidations (LQL/LQS).
//! Mutation is serialized per bucket key via [`dashmap`]'s sharded locking, so
//! many producer tasks (one per WS collector) and one flusher can share the
//! map without a single global lock.

use crate::parser::{LiquidationEvent, PositionSide, TakerSide, TradeEvent};
use dashmap::DashMap;
use perp_core::{floor_to_minute, Exchange, PerpSample};
use perp_telemetry::Metrics;

/// Key identifying one minute's accumulator for one (exchange, symbol).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    exchange: Exchange,
    symbol: String,
    minute_start: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TradeBucket {
    tbv: f64,
    tsv: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct LiqBucket {
    lql: f64,
    lqs: f64,
}

/// In-memory per-(exchange,symbol,minute) accumulator store.
///
/// A scheduled 15s tick flushes every bucket whose `minute_start` is more
/// than 60s in the past, emitting one [`PerpSample`] partial per flushed
/// bucket and removing it from the map.
pub struct BucketAggregator {
    trades: DashMap<BucketKey, TradeBucket>,
    liquidations: DashMap<BucketKey, LiqBucket>,
}

impl Default for BucketAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketAggregator {
    pub fn new() -> Self {
        Self { trades: DashMap::new(), liquidations: DashMap::new() }
    }

    /// Accumulate one taker trade into its minute bucket.
    pub fn record_trade(&self, symbol: &str, event: TradeEvent) {
        let key = BucketKey {
            exchange: event.exchange,
            symbol: symbol.to_string(),
            minute_start: floor_to_minute(event.ts),
        };
        let mut bucket = self.trades.entry(key).or_default();
        match event.side {
            TakerSide::Buy => bucket.tbv += event.usd_value,
            TakerSide::Sell => bucket.tsv += event.usd_value,
        }
    }

    /// Accumulate one liquidation into its minute bucket.
    pub fn record_liquidation(&self, symbol: &str, event: LiquidationEvent) {
        let key = BucketKey {
            exchange: event.exchange,
            symbol: symbol.to_string(),
            minute_start: floor_to_minute(event.ts),
        };
        let mut bucket = self.liquidations.entry(key).or_default();
        match event.side {
            PositionSide::Long => bucket.lql += event.usd_value,
            PositionSide::Short => bucket.lqs += event.usd_value,
        }
    }

    /// Current count of open (unflushed) buckets of each shape, for the
    /// periodic ingestion summary / metrics gauge.
    pub fn open_bucket_counts(&self) -> (usize, usize) {
        (self.trades.len(), self.liquidations.len())
    }

    /// Flush every bucket whose `minute_start < now_ms - 60_000`, returning
    /// one partial sample per flushed bucket.
    pub fn flush_due(&self, now_ms: i64) -> Vec<PerpSample> {
        let cutoff = now_ms - 60_000;
        let mut out = Vec::new();

        let due_trade_keys: Vec<BucketKey> = self
            .trades
            .iter()
            .filter(|entry| entry.key().minute_start < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for key in due_trade_keys {
            if let Some((_, bucket)) = self.trades.remove(&key) {
                let tag = format!("{}-tv", key.exchange.tag());
                let mut sample = PerpSample::new(key.minute_start, &key.symbol, key.exchange, tag);
                sample.tbv = Some(bucket.tbv);
                sample.tsv = Some(bucket.tsv);
                Metrics::bucket_flush(key.exchange.tag(), "trade");
                out.push(sample);
            }
        }

        let due_liq_keys: Vec<BucketKey> = self
            .liquidations
            .iter()
            .filter(|entry| entry.key().minute_start < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for key in due_liq_keys {
            if let Some((_, bucket)) = self.liquidations.remove(&key) {
                let tag = format!("{}-lq", key.exchange.tag());
                let mut sample = PerpSample::new(key.minute_start, &key.symbol, key.exchange, tag);
                sample.lql = Some(bucket.lql);
                sample.lqs = Some(bucket.lqs);
                Metrics::bucket_flush(key.exchange.tag(), "liquidation");
                out.push(sample);
            }
        }

        out
    }
}

/// One OHLCV 1-minute row, for TV redistribution weighting.
#[derive(Debug, Clone, Copy)]
pub struct OhlcvMinute {
    pub volume: f64,
    pub close: f64,
}

/// Redistribute a 5-minute taker-volume aggregate (Binance historical TV)
/// across the five corresponding 1-minute OHLCV slots.
///
/// `w_i = (v_i / sum(v)) * (1 + sign(delta_c_i)) / 2`, normalized to sum to 1,
/// for TBV; the mirror `(1 - sign)/2` weighting for TSV. Falls back to an
/// equal 1/5 split when the five rows are unavailable, non-consecutive (the
/// caller is responsible for only passing a consecutive run), or
/// `sum(v) == 0`.
pub fn redistribute_five_minute_taker_volume(
    tbv_total: f64,
    tsv_total: f64,
    minutes: Option<&[OhlcvMinute; 5]>,
) -> [(f64, f64); 5] {
    let equal_split = [(tbv_total / 5.0, tsv_total / 5.0); 5];

    let Some(minutes) = minutes else {
        return equal_split;
    };

    let total_volume: f64 = minutes.iter().map(|m| m.volume).sum();
    if total_volume <= 0.0 {
        return equal_split;
    }

    // Per-minute close delta needs a "previous close"; the first slot in the
    // window has no predecessor inside the window and is treated as flat.
    let mut up_weights = [0.0f64; 5];
    let mut down_weights = [0.0f64; 5];
    let mut prev_close: Option<f64> = None;
    for (i, minute) in minutes.iter().enumerate() {
        let sign = match prev_close {
            Some(prev) if minute.close > prev => 1.0,
            Some(prev) if minute.close < prev => -1.0,
            _ => 0.0,
        };
        let vol_share = minute.volume / total_volume;
        up_weights[i] = vol_share * (1.0 + sign) / 2.0;
        down_weights[i] = vol_share * (1.0 - sign) / 2.0;
        prev_close = Some(minute.close);
    }

    let up_sum: f64 = up_weights.iter().sum();
    let down_sum: f64 = down_weights.iter().sum();

    let mut result = [(0.0, 0.0); 5];
    for i in 0..5 {
        let tbv_i = if up_sum > 0.0 { tbv_total * up_weights[i] / up_sum } else { tbv_total / 5.0 };
        let tsv_i = if down_sum > 0.0 { tsv_total * down_weights[i] / down_sum } else { tsv_total / 5.0 };
        result[i] = (tbv_i, tsv_i);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{LiquidationEvent, PositionSide, TakerSide, TradeEvent};

    #[test]
    fn flush_is_scoped_to_minute_older_than_now_minus_60s() {
        let agg = BucketAggregator::new();
        agg.record_trade("BTC", TradeEvent {
            exchange: Exchange::Binance,
            ts: 0,
            side: TakerSide::Buy,
            usd_value: 100.0,
        });
        // Not yet due: now is within 60s of the bucket's minute start.
        assert!(agg.flush_due(30_000).is_empty());
        // Due once 60s have elapsed past the minute start.
        let flushed = agg.flush_due(120_000);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].tbv, Some(100.0));
    }

    #[test]
    fn liquidation_bucket_scenario_from_spec() {
        // three liquidations within minute T.
        let agg = BucketAggregator::new();
        let t = 0i64;
        agg.record_liquidation("BTC", LiquidationEvent {
            exchange: Exchange::Binance,
            ts: t + 5_000,
            side: PositionSide::Long,
            usd_value: 100.0,
        });
        agg.record_liquidation("BTC", LiquidationEvent {
            exchange: Exchange::Binance,
            ts: t + 20_000,
            side: PositionSide::Short,
            usd_value: 200.0,
        });
        agg.record_liquidation("BTC", LiquidationEvent {
            exchange: Exchange::Binance,
            ts: t + 59_000,
            side: PositionSide::Long,
            usd_value: 50.0,
        });

        let flushed = agg.flush_due(t + 60_000 + 1);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].lql, Some(150.0));
        assert_eq!(flushed[0].lqs, Some(200.0));
    }

    #[test]
    fn redistribution_weight_sums_match_totals() {
        let minutes = [
            OhlcvMinute { volume: 1.0, close: 10.0 },
            OhlcvMinute { volume: 1.0, close: 11.0 },
            OhlcvMinute { volume: 1.0, close: 11.0 },
            OhlcvMinute { volume: 1.0, close: 10.0 },
            OhlcvMinute { volume: 1.0, close: 12.0 },
        ];
        let result = redistribute_five_minute_taker_volume(100.0, 50.0, Some(&minutes));
        let tbv_sum: f64 = result.iter().map(|(tbv, _)| tbv).sum();
        let tsv_sum: f64 = result.iter().map(|(_, tsv)| tsv).sum();
        assert!((tbv_sum - 100.0).abs() < 1e-6);
        assert!((tsv_sum - 50.0).abs() < 1e-6);
        // Up-minutes (index 1: 10->11, index 4: 10->12) should dominate tbv.
        assert!(result[1].0 > result[0].0);
        assert!(result[4].0 > result[0].0);
        // Down-minute (index 3: 11->10) should dominate tsv.
        assert!(result[3].1 > result[1].1);
    }

    #[test]
    fn redistribution_falls_back_to_equal_split_without_ohlcv() {
        let result = redistribute_five_minute_taker_volume(100.0, 50.0, None);
        for (tbv, tsv) in result {
            assert!((tbv - 20.0).abs() < 1e-9);
            assert!((tsv - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn redistribution_falls_back_when_volume_is_zero() {
        let minutes = [OhlcvMinute { volume: 0.0, close: 1.0 }; 5];
        let result = redistribute_five_minute_taker_volume(100.0, 50.0, Some(&minutes));
        assert!((result[0].0 - 20.0).abs() < 1e-9);
    }
}
