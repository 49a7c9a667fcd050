//! Derived record (`PerpMetric`).

use crate::exchange::Exchange;
use serde::{Deserialize, Serialize};

/// Magnitude clamp applied to every `_chg_` field.
pub const CHANGE_CLAMP: f64 = 9999.999;

/// Lookback windows, in minutes, over which percent-change features are computed.
pub const WINDOWS: [u32; 3] = [1, 5, 10];

/// Metrics that get a `_chg_W` feature for each window in [`WINDOWS`].
pub const CHANGE_METRICS: [&str; 11] = [
    "c", "v", "oi", "pfr", "lsr", "rsi1", "rsi60", "tbv", "tsv", "lql", "lqs",
];

/// Dominant liquidation side over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiqSide {
    Long,
    Short,
}

impl LiqSide {
    pub const fn as_str(self) -> &'static str {
        match self {
            LiqSide::Long => "long",
            LiqSide::Short => "short",
        }
    }
}

/// Percent change of `curr` relative to `prev`, clamped to ±[`CHANGE_CLAMP`].
///
/// Returns `None` when `prev` is null or zero.
pub fn percent_change(curr: Option<f64>, prev: Option<f64>) -> Option<f64> {
    let curr = curr?;
    let prev = prev?;
    if prev == 0.0 {
        return None;
    }
    let pct = 100.0 * (curr - prev) / prev.abs();
    Some(pct.clamp(-CHANGE_CLAMP, CHANGE_CLAMP))
}

/// One minute's liquidation totals, as carried on a `PerpSample`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinuteLiquidation {
    pub lql: Option<f64>,
    pub lqs: Option<f64>,
}

impl MinuteLiquidation {
    /// Dominant side for this single minute, by USD value (the only granularity
    /// a merged `PerpSample` retains — event counts are not persisted past the
    /// bucket-aggregation stage). `None` when both sides are absent/zero/tied.
    fn dominant(&self) -> Option<LiqSide> {
        match (self.lql, self.lqs) {
            (Some(l), Some(s)) if l > s => Some(LiqSide::Long),
            (Some(l), Some(s)) if s > l => Some(LiqSide::Short),
            (Some(l), None) if l > 0.0 => Some(LiqSide::Long),
            (None, Some(s)) if s > 0.0 => Some(LiqSide::Short),
            _ => None,
        }
    }
}

/// Window-majority liquidation side.
///
/// Majority is by count of per-minute dominant sides within the window; ties are
/// broken by summed USD value across the window; a remaining tie is `None`.
pub fn liquidation_side_majority(window: &[MinuteLiquidation]) -> Option<LiqSide> {
    let mut long_count = 0usize;
    let mut short_count = 0usize;
    let mut long_sum = 0.0f64;
    let mut short_sum = 0.0f64;

    for minute in window {
        match minute.dominant() {
            Some(LiqSide::Long) => long_count += 1,
            Some(LiqSide::Short) => short_count += 1,
            None => {}
        }
        long_sum += minute.lql.unwrap_or(0.0);
        short_sum += minute.lqs.unwrap_or(0.0);
    }

    match long_count.cmp(&short_count) {
        std::cmp::Ordering::Greater => Some(LiqSide::Long),
        std::cmp::Ordering::Less => Some(LiqSide::Short),
        std::cmp::Ordering::Equal => {
            if long_sum > short_sum {
                Some(LiqSide::Long)
            } else if short_sum > long_sum {
                Some(LiqSide::Short)
            } else {
                None
            }
        }
    }
}

/// Derived record: raw fields mirrored from the unified sample plus percent
/// change features over 1/5/10-minute lookback windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpMetric {
    pub ts: i64,
    pub symbol: String,
    pub exchange: Exchange,

    // Raw mirror columns (unconditionally refreshed).
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

    // _chg_ features, one triple per metric in CHANGE_METRICS.
    pub c_chg_1m: Option<f64>,
    pub c_chg_5m: Option<f64>,
    pub c_chg_10m: Option<f64>,
    pub v_chg_1m: Option<f64>,
    pub v_chg_5m: Option<f64>,
    pub v_chg_10m: Option<f64>,
    pub oi_chg_1m: Option<f64>,
    pub oi_chg_5m: Option<f64>,
    pub oi_chg_10m: Option<f64>,
    pub pfr_chg_1m: Option<f64>,
    pub pfr_chg_5m: Option<f64>,
    pub pfr_chg_10m: Option<f64>,
    pub lsr_chg_1m: Option<f64>,
    pub lsr_chg_5m: Option<f64>,
    pub lsr_chg_10m: Option<f64>,
    pub rsi1_chg_1m: Option<f64>,
    pub rsi1_chg_5m: Option<f64>,
    pub rsi1_chg_10m: Option<f64>,
    pub rsi60_chg_1m: Option<f64>,
    pub rsi60_chg_5m: Option<f64>,
    pub rsi60_chg_10m: Option<f64>,
    pub tbv_chg_1m: Option<f64>,
    pub tbv_chg_5m: Option<f64>,
    pub tbv_chg_10m: Option<f64>,
    pub tsv_chg_1m: Option<f64>,
    pub tsv_chg_5m: Option<f64>,
    pub tsv_chg_10m: Option<f64>,
    pub lql_chg_1m: Option<f64>,
    pub lql_chg_5m: Option<f64>,
    pub lql_chg_10m: Option<f64>,
    pub lqs_chg_1m: Option<f64>,
    pub lqs_chg_5m: Option<f64>,
    pub lqs_chg_10m: Option<f64>,

    pub lqside_chg_1m: Option<LiqSide>,
    pub lqside_chg_5m: Option<LiqSide>,
    pub lqside_chg_10m: Option<LiqSide>,
}

impl PerpMetric {
    /// Detect column: `c_chg_1m` null proxies "row never had
    /// its change columns populated".
    pub fn is_populated(&self) -> bool {
        self.c_chg_1m.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_change_basic() {
        assert_eq!(percent_change(Some(1.6), Some(1.5)), Some(100.0 * 0.1 / 1.5));
    }

    #[test]
    fn percent_change_null_prev_is_none() {
        assert_eq!(percent_change(Some(1.0), None), None);
    }

    #[test]
    fn percent_change_zero_prev_is_none() {
        assert_eq!(percent_change(Some(1.0), Some(0.0)), None);
    }

    #[test]
    fn percent_change_clamps_magnitude() {
        let pct = percent_change(Some(1_000_000.0), Some(1.0)).unwrap();
        assert_eq!(pct, CHANGE_CLAMP);
        let pct = percent_change(Some(-1_000_000.0), Some(1.0)).unwrap();
        assert_eq!(pct, -CHANGE_CLAMP);
    }

    fn m(lql: Option<f64>, lqs: Option<f64>) -> MinuteLiquidation {
        MinuteLiquidation { lql, lqs }
    }

    #[test]
    fn majority_by_count() {
        let window = [
            m(Some(100.0), None),
            m(Some(50.0), None),
            m(None, Some(10.0)),
        ];
        assert_eq!(liquidation_side_majority(&window), Some(LiqSide::Long));
    }

    #[test]
    fn majority_tie_broken_by_summed_qty() {
        let window = [m(Some(1000.0), None), m(None, Some(1.0))];
        // 1 long-dominant minute vs 1 short-dominant minute: tie by count,
        // broken by summed value (1000 long vs 1 short).
        assert_eq!(liquidation_side_majority(&window), Some(LiqSide::Long));
    }

    #[test]
    fn majority_remaining_tie_is_none() {
        let window = [m(Some(100.0), None), m(None, Some(100.0))];
        assert_eq!(liquidation_side_majority(&window), None);
    }

    #[test]
    fn majority_idempotent_over_unchanged_window() {
        let window = [m(Some(100.0), None), m(Some(50.0), None), m(None, Some(5.0))];
        let first = liquidation_side_majority(&window);
        let second = liquidation_side_majority(&window);
        assert_eq!(first, second);
    }
}
