//! Upstream REST endpoint registry.
//!
//! One [`EndpointConfig`] per (venue, metric) backfill unit the orchestrator
//! discovers at startup. Page sizes and base URLs are
//! the venue-documented values; paging behavior itself lives in
//! [`crate::paging`].

use crate::policy::EndpointConfig;
use perp_core::Exchange;

/// One historical REST backfill unit: a venue, a metric tag (matches the
/// `perpspec` suffix the feed contributes, e.g. `ohlcv`, `oi`, `pfr`), and
/// its endpoint config.
#[derive(Debug, Clone)]
pub struct BackfillUnit {
    pub exchange: Exchange,
    pub metric: &'static str,
    pub config: EndpointConfig,
}

/// All backfill units this pipeline ingests: kline/OI/account-
/// ratio per venue, plus OKX premium-history and Coinalyze liquidation
/// history. RSI has no backfill unit of its own: it's derived from the
/// Binance kline unit's closes (`perp_feed::compute_rsi_series` for the
/// historical pass, a per-symbol `RsiCalculator` in the live collector).
pub fn all_backfill_units() -> Vec<BackfillUnit> {
    vec![
        BackfillUnit {
            exchange: Exchange::Binance,
            metric: "ohlcv",
            config: EndpointConfig::new("https://fapi.binance.com/fapi/v1/klines", 1500),
        },
        BackfillUnit {
            exchange: Exchange::Binance,
            metric: "oi",
            config: EndpointConfig::new(
                "https://fapi.binance.com/futures/data/openInterestHist",
                500,
            ),
        },
        BackfillUnit {
            exchange: Exchange::Binance,
            metric: "lsr",
            config: EndpointConfig::new(
                "https://fapi.binance.com/futures/data/globalLongShortAccountRatio",
                500,
            ),
        },
        BackfillUnit {
            exchange: Exchange::Binance,
            metric: "tv",
            config: EndpointConfig::new(
                "https://fapi.binance.com/futures/data/takerlongshortRatio",
                500,
            ),
        },
        BackfillUnit {
            exchange: Exchange::Bybit,
            metric: "ohlcv",
            config: EndpointConfig::new("https://api.bybit.com/v5/market/kline", 1000),
        },
        BackfillUnit {
            exchange: Exchange::Bybit,
            metric: "oi",
            config: EndpointConfig::new("https://api.bybit.com/v5/market/open-interest", 200),
        },
        BackfillUnit {
            exchange: Exchange::Bybit,
            metric: "lsr",
            config: EndpointConfig::new("https://api.bybit.com/v5/market/account-ratio", 500),
        },
        BackfillUnit {
            exchange: Exchange::Okx,
            metric: "ohlcv",
            config: EndpointConfig::new(
                "https://www.okx.com/api/v5/market/history-candles",
                100,
            ),
        },
        BackfillUnit {
            exchange: Exchange::Okx,
            metric: "oi",
            config: EndpointConfig::new(
                "https://www.okx.com/api/v5/rubik/stat/contracts/open-interest-volume",
                100,
            ),
        },
        BackfillUnit {
            exchange: Exchange::Okx,
            metric: "lsr",
            config: EndpointConfig::new(
                "https://www.okx.com/api/v5/rubik/stat/contracts/long-short-account-ratio-contract",
                100,
            ),
        },
        BackfillUnit {
            exchange: Exchange::Okx,
            metric: "pfr",
            config: EndpointConfig::new("https://www.okx.com/api/v5/public/premium-history", 100),
        },
    ]
}

/// Coinalyze liquidation history, consumed for all three venues with
/// venue-specific instrument suffixes. Requires `COINALYZE_KEY`.
pub fn coinalyze_liquidation_config() -> EndpointConfig {
    EndpointConfig::new("https://api.coinalyze.net/v1/liquidation-history", 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_unit_per_venue_metric() {
        let units = all_backfill_units();
        assert!(units.iter().any(|u| u.exchange == Exchange::Binance && u.metric == "ohlcv"));
        assert!(units.iter().any(|u| u.exchange == Exchange::Okx && u.metric == "pfr"));
    }
}
