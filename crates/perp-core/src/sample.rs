//! Canonical unified record (`PerpSample`).

use crate::exchange::Exchange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Canonical symbol for the synthetic aggregate "market" index.
pub const SYNTHETIC_MARKET_SYMBOL: &str = "MT";

/// One venue-metric feed tag, e.g. `bin-ohlcv`. Stored as an unordered set on
/// every row but represented internally as a `BTreeSet<String>` so insertion is
/// idempotent and iteration order is deterministic for tests/snapshots.
pub type PerpSpec = BTreeSet<String>;

/// Canonical unified record: one row per `(ts, symbol, exchange)`.
///
/// Every numeric field is `Option<f64>` — unset means "no feed has contributed
/// this field yet", not zero. Upserts only ever turn `None` into `Some`, or
/// replace one `Some` with a newer `Some`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpSample {
    pub ts: i64,
    pub symbol: String,
    pub exchange: Exchange,
    pub perpspec: PerpSpec,

    pub o: Option<f64>,
    pub h: Option<f64>,
    pub l: Option<f64>,
    pub c: Option<f64>,
    pub v: Option<f64>,

    pub oi: Option<f64>,
    pub pfr: Option<f64>,
    pub lsr: Option<f64>,
    pub rsi1: Option<f64>,
    pub rsi60: Option<f64>,
    pub tbv: Option<f64>,
    pub tsv: Option<f64>,
    pub lql: Option<f64>,
    pub lqs: Option<f64>,

    pub notes: Option<String>,
}

impl PerpSample {
    /// Construct an empty sample for a key, with a single perpspec tag.
    pub fn new(ts: i64, symbol: impl Into<String>, exchange: Exchange, tag: impl Into<String>) -> Self {
        let mut perpspec = PerpSpec::new();
        perpspec.insert(tag.into());
        Self {
            ts,
            symbol: symbol.into(),
            exchange,
            perpspec,
            o: None,
            h: None,
            l: None,
            c: None,
            v: None,
            oi: None,
            pfr: None,
            lsr: None,
            rsi1: None,
            rsi60: None,
            tbv: None,
            tsv: None,
            lql: None,
            lqs: None,
            notes: None,
        }
    }

    /// Every stored sample lands on a minute boundary.
    pub fn is_minute_aligned(&self) -> bool {
        crate::timestamp::is_minute_aligned(self.ts)
    }

    /// MT rows never carry venue-specific fields.
    pub fn is_synthetic_market(&self) -> bool {
        self.symbol == SYNTHETIC_MARKET_SYMBOL
    }

    /// Additively merge `other` into `self`: a non-null field in `self` is never
    /// clobbered by a null in `other`; a non-null field in `other` overwrites
    /// whatever is currently in `self`.
    pub fn merge_from(&mut self, other: &PerpSample) {
        macro_rules! take_if_some {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take_if_some!(o);
        take_if_some!(h);
        take_if_some!(l);
        take_if_some!(c);
        take_if_some!(v);
        take_if_some!(oi);
        take_if_some!(pfr);
        take_if_some!(lsr);
        take_if_some!(rsi1);
        take_if_some!(rsi60);
        take_if_some!(tbv);
        take_if_some!(tsv);
        take_if_some!(lql);
        take_if_some!(lqs);
        if other.notes.is_some() {
            self.notes = other.notes.clone();
        }
        self.perpspec.extend(other.perpspec.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_additive_and_non_clobbering() {
        let mut a = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-ohlcv");
        a.o = Some(1.0);
        a.c = Some(1.5);

        let mut b = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-pfr");
        b.pfr = Some(0.0001);

        a.merge_from(&b);

        assert_eq!(a.o, Some(1.0));
        assert_eq!(a.c, Some(1.5));
        assert_eq!(a.pfr, Some(0.0001));
        assert_eq!(
            a.perpspec,
            ["bin-ohlcv".to_string(), "bin-pfr".to_string()]
                .into_iter()
                .collect::<PerpSpec>()
        );
    }

    #[test]
    fn later_non_null_overwrites_earlier_non_null() {
        let mut a = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-ohlcv");
        a.c = Some(1.5);

        let mut b = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-ohlcv");
        b.c = Some(1.6);

        a.merge_from(&b);

        assert_eq!(a.c, Some(1.6));
        assert_eq!(a.perpspec.len(), 1);
    }

    #[test]
    fn null_never_clobbers_non_null() {
        let mut a = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-ohlcv");
        a.c = Some(1.5);

        let b = PerpSample::new(60_000, "BTC", Exchange::Binance, "bin-pfr");
        a.merge_from(&b);

        assert_eq!(a.c, Some(1.5));
    }
}
