//! Unified row merger (C6).
//!
//! Pure in-memory merge: given a batch of partial samples from potentially
//! many feeds, group by `(ts, symbol, exchange)` and fold them in input order
//! using [`PerpSample::merge_from`] — copy only the fields the incoming
//! record carries, never overwrite a non-null field with null, and
//! union-insert the record's perpspec tag. Output order matches first
//! appearance of each key in the input batch, which keeps test fixtures and
//! logs deterministic.

use indexmap::IndexMap;
use perp_core::{Exchange, PerpSample};
use perp_telemetry::Metrics;

/// Merge a batch of partial samples into one row per `(ts, symbol, exchange)`.
pub fn merge_partials(partials: impl IntoIterator<Item = PerpSample>) -> Vec<PerpSample> {
    let mut rows: IndexMap<(i64, String, Exchange), PerpSample> = IndexMap::new();

    for partial in partials {
        let key = (partial.ts, partial.symbol.clone(), partial.exchange);
        rows.entry(key)
            .and_modify(|existing| existing.merge_from(&partial))
            .or_insert(partial);
    }

    let merged: Vec<PerpSample> = rows.into_values().collect();
    if let Some(first) = merged.first() {
        Metrics::merge_batch_size(first.exchange.tag(), merged.len() as f64);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_two_partials_for_same_key() {
        let mut ohlcv = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-ohlcv");
        ohlcv.o = Some(1.0);
        ohlcv.h = Some(2.0);
        ohlcv.l = Some(0.5);
        ohlcv.c = Some(1.5);
        ohlcv.v = Some(10.0);

        let mut pfr = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-pfr");
        pfr.pfr = Some(0.0001);

        let merged = merge_partials([ohlcv, pfr]);
        assert_eq!(merged.len(), 1);
        let row = &merged[0];
        assert_eq!(row.o, Some(1.0));
        assert_eq!(row.pfr, Some(0.0001));
        assert_eq!(row.perpspec.len(), 2);
    }

    #[test]
    fn later_value_for_same_tag_overwrites_and_dedupes_tag() {
        let mut first = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-ohlcv");
        first.c = Some(1.5);
        let mut second = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-ohlcv");
        second.c = Some(1.6);

        let merged = merge_partials([first, second]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].c, Some(1.6));
        assert_eq!(merged[0].perpspec.len(), 1);
    }

    #[test]
    fn distinct_keys_produce_distinct_rows() {
        let a = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-ohlcv");
        let b = PerpSample::new(60_000, "ETH", Exchange::Binance, "bin-ohlcv");
        let c = PerpSample::new(120_000, "BTC", Exchange::Binance, "bin-ohlcv");
        let merged = merge_partials([a, b, c]);
        assert_eq!(merged.len(), 3);
    }
}
