//! Minute bucket aggregator and unified row merger (C5/C6) for the perp
//! market-data pipeline, plus the per-venue payload parsers that feed them.

pub mod bucket;
pub mod error;
pub mod merge;
pub mod parser;
pub mod rsi;

pub use bucket::{redistribute_five_minute_taker_volume, BucketAggregator, OhlcvMinute};
pub use error::{FeedError, FeedResult};
pub use merge::merge_partials;
pub use rsi::{compute_rsi_series, RsiCalculator};
pub use parser::{
    parse_binance_liquidation, parse_binance_trade, parse_bybit_liquidation, parse_bybit_trade,
    parse_kline, parse_long_short_ratio, parse_okx_liquidation, parse_okx_trade,
    parse_open_interest, parse_premium_funding_rate, parse_rsi, LiquidationEvent, PositionSide,
    TakerSide, TradeEvent,
};
