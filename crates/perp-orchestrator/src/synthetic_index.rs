//! Synthetic aggregate "market" index (`MT`).
//!
//! `MT` is derived, not fetched: for a given `(exchange, minute)` it's the
//! simple average of the OHLCV fields across a fixed basket of major symbols.
//! Only OHLCV-like fields are populated; every venue-specific field stays
//! `None` without special-casing it at the storage layer.

use perp_core::{Exchange, PerpSample, SYNTHETIC_MARKET_SYMBOL};
use std::collections::HashMap;

/// Average the basket's OHLCV rows for one `(exchange, minute)` into one
/// synthetic `MT` row. `rows` must already be filtered to that exchange and
/// minute; symbols outside the basket or missing `o`/`h`/`l`/`c`/`v` are
/// ignored rather than failing the whole average.
pub fn average_basket(exchange: Exchange, ts: i64, rows: &[&PerpSample]) -> Option<PerpSample> {
    let complete: Vec<&&PerpSample> = rows
        .iter()
        .filter(|r| r.o.is_some() && r.h.is_some() && r.l.is_some() && r.c.is_some() && r.v.is_some())
        .collect();
    if complete.is_empty() {
        return None;
    }

    let n = complete.len() as f64;
    let sum = |f: fn(&PerpSample) -> Option<f64>| -> f64 { complete.iter().filter_map(|r| f(r)).sum::<f64>() / n };

    let tag = format!("{}-ohlcv", exchange.tag());
    let mut sample = PerpSample::new(ts, SYNTHETIC_MARKET_SYMBOL, exchange, tag);
    sample.o = Some(sum(|r| r.o));
    sample.h = Some(sum(|r| r.h));
    sample.l = Some(sum(|r| r.l));
    sample.c = Some(sum(|r| r.c));
    sample.v = Some(sum(|r| r.v));
    Some(sample)
}

/// Group a batch of merged unified rows by `(exchange, ts)` and compute one
/// `MT` row per group whose symbol is in `basket`. Rows whose symbol isn't in
/// the basket are left untouched by the caller; this only ever *adds* `MT`
/// rows alongside the input.
pub fn derive_mt_rows(rows: &[PerpSample], basket: &[String]) -> Vec<PerpSample> {
    let mut groups: HashMap<(Exchange, i64), Vec<&PerpSample>> = HashMap::new();
    for row in rows {
        if row.symbol == SYNTHETIC_MARKET_SYMBOL {
            continue;
        }
        if !basket.iter().any(|s| s.eq_ignore_ascii_case(&row.symbol)) {
            continue;
        }
        groups.entry((row.exchange, row.ts)).or_default().push(row);
    }

    groups
        .into_iter()
        .filter_map(|((exchange, ts), group)| average_basket(exchange, ts, &group))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ohlcv(symbol: &str, o: f64, h: f64, l: f64, c: f64, v: f64) -> PerpSample {
        let mut s = PerpSample::new(60_000, symbol, Exchange::Binance, "bin-ohlcv");
        s.o = Some(o);
        s.h = Some(h);
        s.l = Some(l);
        s.c = Some(c);
        s.v = Some(v);
        s
    }

    #[test]
    fn averages_basket_ohlcv_fields() {
        let btc = ohlcv("BTC", 100.0, 110.0, 90.0, 105.0, 10.0);
        let eth = ohlcv("ETH", 10.0, 12.0, 8.0, 11.0, 20.0);
        let mt = average_basket(Exchange::Binance, 60_000, &[&btc, &eth]).unwrap();
        assert_eq!(mt.symbol, SYNTHETIC_MARKET_SYMBOL);
        assert_eq!(mt.o, Some(55.0));
        assert_eq!(mt.v, Some(15.0));
        assert!(mt.oi.is_none());
        assert!(mt.pfr.is_none());
    }

    #[test]
    fn incomplete_rows_are_excluded_not_fatal() {
        let complete = ohlcv("BTC", 100.0, 110.0, 90.0, 105.0, 10.0);
        let mut incomplete = ohlcv("ETH", 10.0, 12.0, 8.0, 11.0, 20.0);
        incomplete.c = None;
        let mt = average_basket(Exchange::Binance, 60_000, &[&complete, &incomplete]).unwrap();
        assert_eq!(mt.o, Some(100.0));
    }

    #[test]
    fn derive_mt_rows_groups_by_exchange_and_minute() {
        let rows = vec![
            ohlcv("BTC", 100.0, 110.0, 90.0, 105.0, 10.0),
            ohlcv("ETH", 10.0, 12.0, 8.0, 11.0, 20.0),
        ];
        let basket = vec!["BTC".to_string(), "ETH".to_string()];
        let mt_rows = derive_mt_rows(&rows, &basket);
        assert_eq!(mt_rows.len(), 1);
        assert_eq!(mt_rows[0].symbol, SYNTHETIC_MARKET_SYMBOL);
    }

    #[test]
    fn symbols_outside_basket_are_ignored() {
        let rows = vec![ohlcv("DOGE", 1.0, 1.0, 1.0, 1.0, 1.0)];
        let basket = vec!["BTC".to_string()];
        assert!(derive_mt_rows(&rows, &basket).is_empty());
    }
}
