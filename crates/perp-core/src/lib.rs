//! Canonical domain types for the perp market-data pipeline.
//!
//! This crate provides the types shared across every stage of the pipeline:
//! - [`Exchange`], [`symbol`]: venue identifiers and canonical/venue symbol mapping
//! - [`timestamp`]: wire-timestamp normalization onto the minute grid
//! - [`PerpSample`]: the unified per-minute record
//! - [`PerpMetric`]: the derived percent-change record

pub mod error;
pub mod exchange;
pub mod metric;
pub mod sample;
pub mod symbol;
pub mod timestamp;

pub use error::{CoreError, Result};
pub use exchange::Exchange;
pub use metric::{
    liquidation_side_majority, percent_change, LiqSide, MinuteLiquidation, PerpMetric,
    CHANGE_CLAMP, CHANGE_METRICS, WINDOWS,
};
pub use sample::{PerpSample, PerpSpec, SYNTHETIC_MARKET_SYMBOL};
pub use symbol::{from_venue_symbol, to_venue_symbol, SymbolCase};
pub use timestamp::{floor_to_minute, is_minute_aligned, normalize_timestamp, RawTimestamp, MINUTE_MS};
