//! Per-venue payload decoding into canonical partial records (C1/C2 applied
//! at the wire boundary).
//!
//! Each function here takes the venue's native JSON shape (from a WS
//! [`perp_ws::RawFrame`] or a REST response row, both already unpacked to a
//! `serde_json::Value` by the caller) and returns a typed, fully-normalized
//! value: a [`PerpSample`] partial for per-minute metrics, or a [`TradeEvent`]
//! / [`LiquidationEvent`] for the sub-minute streams the bucket aggregator
//! accumulates. No `serde_json::Value` crosses past this module.

use crate::error::{FeedError, FeedResult};
use perp_core::{floor_to_minute, normalize_timestamp, Exchange, PerpSample};
use serde_json::Value;

fn field<'a>(value: &'a Value, shape: &'static str, key: &'static str) -> FeedResult<&'a Value> {
    value.get(key).ok_or(FeedError::MissingField { shape, field: key })
}

fn field_f64(value: &Value, shape: &'static str, key: &'static str) -> FeedResult<f64> {
    let v = field(value, shape, key)?;
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
        .ok_or(FeedError::MissingField { shape, field: key })
}

/// Side of a taker trade, for TBV/TSV bucket accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakerSide {
    Buy,
    Sell,
}

/// One taker trade print, already USD-valued and minute-bucketable.
#[derive(Debug, Clone, Copy)]
pub struct TradeEvent {
    pub exchange: Exchange,
    pub ts: i64,
    pub side: TakerSide,
    pub usd_value: f64,
}

/// Side of a liquidated position, for LQL/LQS bucket accumulation. This is
/// already venue-inverted from the raw wire `side` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

/// One forced-liquidation event.
#[derive(Debug, Clone, Copy)]
pub struct LiquidationEvent {
    pub exchange: Exchange,
    pub ts: i64,
    pub side: PositionSide,
    pub usd_value: f64,
}

/// Parse a 1-minute confirmed kline frame (WS) or a historical kline row
/// (REST) into an OHLCV partial sample. `symbol` is the already-canonical
/// token (the caller resolves venue instrument id -> canonical via
/// `perp_core::symbol` before calling this).
pub fn parse_kline(
    exchange: Exchange,
    symbol: &str,
    value: &Value,
) -> FeedResult<PerpSample> {
    match exchange {
        Exchange::Binance => parse_binance_kline(symbol, value),
        Exchange::Bybit => parse_bybit_kline(symbol, value),
        Exchange::Okx => parse_okx_kline(symbol, value),
    }
}

/// Binance WS kline: `{"k": {"t": ms, "o": "..", "h": "..", "l": "..", "c": "..", "v": ".."}}`.
/// Binance REST kline: `[openTime, open, high, low, close, volume, ...]`.
fn parse_binance_kline(symbol: &str, value: &Value) -> FeedResult<PerpSample> {
    if let Some(k) = value.get("k") {
        let ts = floor_to_minute(normalize_timestamp(field_f64(k, "binance_kline_ws", "t")?)?);
        let mut sample = PerpSample::new(ts, symbol, Exchange::Binance, "bin-ohlcv");
        sample.o = Some(field_f64(k, "binance_kline_ws", "o")?);
        sample.h = Some(field_f64(k, "binance_kline_ws", "h")?);
        sample.l = Some(field_f64(k, "binance_kline_ws", "l")?);
        sample.c = Some(field_f64(k, "binance_kline_ws", "c")?);
        sample.v = Some(field_f64(k, "binance_kline_ws", "v")?);
        return Ok(sample);
    }
    let row = value
        .as_array()
        .ok_or(FeedError::MissingField { shape: "binance_kline_rest", field: "row" })?;
    let open_time = row
        .first()
        .and_then(Value::as_f64)
        .ok_or(FeedError::MissingField { shape: "binance_kline_rest", field: "0" })?;
    let num = |i: usize, name: &'static str| -> FeedResult<f64> {
        row.get(i)
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64()))
            .ok_or(FeedError::MissingField { shape: "binance_kline_rest", field: name })
    };
    let ts = floor_to_minute(normalize_timestamp(open_time)?);
    let mut sample = PerpSample::new(ts, symbol, Exchange::Binance, "bin-ohlcv");
    sample.o = Some(num(1, "open")?);
    sample.h = Some(num(2, "high")?);
    sample.l = Some(num(3, "low")?);
    sample.c = Some(num(4, "close")?);
    sample.v = Some(num(5, "volume")?);
    Ok(sample)
}

/// Bybit WS kline: `{"data": [{"start": ms, "open": "..", ...}]}`.
/// Bybit REST kline row: `["start", "open", "high", "low", "close", "volume", "turnover"]`.
fn parse_bybit_kline(symbol: &str, value: &Value) -> FeedResult<PerpSample> {
    if let Some(row) = value.get("data").and_then(|d| d.as_array()).and_then(|a| a.first()) {
        let ts = floor_to_minute(normalize_timestamp(field_f64(row, "bybit_kline_ws", "start")?)?);
        let mut sample = PerpSample::new(ts, symbol, Exchange::Bybit, "byb-ohlcv");
        sample.o = Some(field_f64(row, "bybit_kline_ws", "open")?);
        sample.h = Some(field_f64(row, "bybit_kline_ws", "high")?);
        sample.l = Some(field_f64(row, "bybit_kline_ws", "low")?);
        sample.c = Some(field_f64(row, "bybit_kline_ws", "close")?);
        sample.v = Some(field_f64(row, "bybit_kline_ws", "volume")?);
        return Ok(sample);
    }
    let row = value
        .as_array()
        .ok_or(FeedError::MissingField { shape: "bybit_kline_rest", field: "row" })?;
    let num = |i: usize, name: &'static str| -> FeedResult<f64> {
        row.get(i)
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()))
            .ok_or(FeedError::MissingField { shape: "bybit_kline_rest", field: name })
    };
    let ts = floor_to_minute(normalize_timestamp(num(0, "start")?)?);
    let mut sample = PerpSample::new(ts, symbol, Exchange::Bybit, "byb-ohlcv");
    sample.o = Some(num(1, "open")?);
    sample.h = Some(num(2, "high")?);
    sample.l = Some(num(3, "low")?);
    sample.c = Some(num(4, "close")?);
    sample.v = Some(num(5, "volume")?);
    Ok(sample)
}

/// OKX WS candle: `{"data": [[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]]}`.
/// OKX REST history-candles row has the same shape.
fn parse_okx_kline(symbol: &str, value: &Value) -> FeedResult<PerpSample> {
    let row = value
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|a| a.first())
        .and_then(Value::as_array)
        .or_else(|| value.as_array())
        .ok_or(FeedError::MissingField { shape: "okx_kline", field: "row" })?;
    let num = |i: usize, name: &'static str| -> FeedResult<f64> {
        row.get(i)
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()))
            .ok_or(FeedError::MissingField { shape: "okx_kline", field: name })
    };
    let ts = floor_to_minute(normalize_timestamp(num(0, "ts")?)?);
    let mut sample = PerpSample::new(ts, symbol, Exchange::Okx, "okx-ohlcv");
    sample.o = Some(num(1, "o")?);
    sample.h = Some(num(2, "h")?);
    sample.l = Some(num(3, "l")?);
    sample.c = Some(num(4, "c")?);
    sample.v = Some(num(5, "vol")?);
    Ok(sample)
}

/// Open interest, USD-normalized. Binance/Bybit return raw OI already in USD
/// (`sumOpenInterestValue` / Bybit's `openInterestValue`); OKX's OI
/// endpoint returns contract count and needs a close-price multiplier, which
/// the caller supplies.
pub fn parse_open_interest(
    exchange: Exchange,
    symbol: &str,
    ts_ms: i64,
    oi_usd: f64,
) -> PerpSample {
    let tag = format!("{}-oi", exchange.tag());
    let mut sample = PerpSample::new(floor_to_minute(ts_ms), symbol, exchange, tag);
    sample.oi = Some(oi_usd);
    sample
}

/// Premium funding rate.
pub fn parse_premium_funding_rate(
    exchange: Exchange,
    symbol: &str,
    ts_ms: i64,
    pfr: f64,
) -> PerpSample {
    let tag = format!("{}-pfr", exchange.tag());
    let mut sample = PerpSample::new(floor_to_minute(ts_ms), symbol, exchange, tag);
    sample.pfr = Some(pfr);
    sample
}

/// Long/short ratio (account- or position-based, per venue).
pub fn parse_long_short_ratio(
    exchange: Exchange,
    symbol: &str,
    ts_ms: i64,
    lsr: f64,
) -> PerpSample {
    let tag = format!("{}-lsr", exchange.tag());
    let mut sample = PerpSample::new(floor_to_minute(ts_ms), symbol, exchange, tag);
    sample.lsr = Some(lsr);
    sample
}

/// RSI(11) on 1-minute and 60-minute aggregated closes.
/// Computed locally from a Binance close-price stream, not fetched — this is
/// the shape [`crate::rsi::compute_rsi_series`] and the live collector's
/// per-symbol `RsiCalculator` emit before the result is merged in.
pub fn parse_rsi(exchange: Exchange, symbol: &str, ts_ms: i64, rsi1: Option<f64>, rsi60: Option<f64>) -> PerpSample {
    let mut sample = PerpSample::new(floor_to_minute(ts_ms), symbol, exchange, format!("{}-rsi", exchange.tag()));
    sample.rsi1 = rsi1;
    sample.rsi60 = rsi60;
    sample
}

/// Binance aggTrade WS frame: `{"s": "BTCUSDT", "p": "..", "q": "..", "m": bool}`.
/// `m` is "is the buyer the market maker"; `!m` means the taker was a buyer.
pub fn parse_binance_trade(value: &Value) -> FeedResult<TradeEvent> {
    let ts = floor_sub_minute(normalize_timestamp(field_f64(value, "binance_trade", "T")?)?);
    let price = field_f64(value, "binance_trade", "p")?;
    let qty = field_f64(value, "binance_trade", "q")?;
    let is_buyer_maker = field(value, "binance_trade", "m")?
        .as_bool()
        .ok_or(FeedError::MissingField { shape: "binance_trade", field: "m" })?;
    let side = if is_buyer_maker { TakerSide::Sell } else { TakerSide::Buy };
    Ok(TradeEvent { exchange: Exchange::Binance, ts, side, usd_value: price * qty })
}

/// Bybit publicTrade WS frame row: `{"T": ms, "p": "..", "v": "..", "S": "Buy"|"Sell"}`.
pub fn parse_bybit_trade(value: &Value) -> FeedResult<TradeEvent> {
    let ts = floor_sub_minute(normalize_timestamp(field_f64(value, "bybit_trade", "T")?)?);
    let price = field_f64(value, "bybit_trade", "p")?;
    let qty = field_f64(value, "bybit_trade", "v")?;
    let side_str = field(value, "bybit_trade", "S")?
        .as_str()
        .ok_or(FeedError::MissingField { shape: "bybit_trade", field: "S" })?;
    let side = if side_str == "Buy" { TakerSide::Buy } else { TakerSide::Sell };
    Ok(TradeEvent { exchange: Exchange::Bybit, ts, side, usd_value: price * qty })
}

/// OKX trades WS frame row: `{"ts": "ms", "px": "..", "sz": "..", "side": "buy"|"sell"}`.
pub fn parse_okx_trade(value: &Value) -> FeedResult<TradeEvent> {
    let ts = floor_sub_minute(normalize_timestamp(field_f64(value, "okx_trade", "ts")?)?);
    let price = field_f64(value, "okx_trade", "px")?;
    let qty = field_f64(value, "okx_trade", "sz")?;
    let side_str = field(value, "okx_trade", "side")?
        .as_str()
        .ok_or(FeedError::MissingField { shape: "okx_trade", field: "side" })?;
    let side = if side_str == "buy" { TakerSide::Buy } else { TakerSide::Sell };
    Ok(TradeEvent { exchange: Exchange::Okx, ts, side, usd_value: price * qty })
}

/// Binance forceOrder WS frame: `{"o": {"T": ms, "S": "BUY"|"SELL", "p": "..", "q": ".."}}`.
/// Side is inverted: the liquidation order itself is a `BUY` to close a
/// short, so `BUY -> short`, `SELL -> long`.
pub fn parse_binance_liquidation(value: &Value) -> FeedResult<LiquidationEvent> {
    let o = field(value, "binance_liquidation", "o")?;
    let ts = floor_sub_minute(normalize_timestamp(field_f64(o, "binance_liquidation", "T")?)?);
    let price = field_f64(o, "binance_liquidation", "p")?;
    let qty = field_f64(o, "binance_liquidation", "q")?;
    let raw_side = field(o, "binance_liquidation", "S")?
        .as_str()
        .ok_or(FeedError::MissingField { shape: "binance_liquidation", field: "S" })?;
    let side = if raw_side == "BUY" { PositionSide::Short } else { PositionSide::Long };
    Ok(LiquidationEvent { exchange: Exchange::Binance, ts, side, usd_value: price * qty })
}

/// Bybit allLiquidation WS frame row: `{"T": ms, "side": "Buy"|"Sell", "price": "..", "size": ".."}`.
/// `Buy -> long`, `Sell -> short`.
pub fn parse_bybit_liquidation(value: &Value) -> FeedResult<LiquidationEvent> {
    let ts = floor_sub_minute(normalize_timestamp(field_f64(value, "bybit_liquidation", "T")?)?);
    let price = field_f64(value, "bybit_liquidation", "price")?;
    let qty = field_f64(value, "bybit_liquidation", "size")?;
    let raw_side = field(value, "bybit_liquidation", "side")?
        .as_str()
        .ok_or(FeedError::MissingField { shape: "bybit_liquidation", field: "side" })?;
    let side = if raw_side == "Buy" { PositionSide::Long } else { PositionSide::Short };
    Ok(LiquidationEvent { exchange: Exchange::Bybit, ts, side, usd_value: price * qty })
}

/// OKX liquidation-orders WS frame row: `{"ts": "ms", "side": "buy"|"sell", "bkPx": "..", "sz": ".."}`.
/// `buy -> short`, `sell -> long`.
pub fn parse_okx_liquidation(value: &Value) -> FeedResult<LiquidationEvent> {
    let ts = floor_sub_minute(normalize_timestamp(field_f64(value, "okx_liquidation", "ts")?)?);
    let price = field_f64(value, "okx_liquidation", "bkPx")?;
    let qty = field_f64(value, "okx_liquidation", "sz")?;
    let raw_side = field(value, "okx_liquidation", "side")?
        .as_str()
        .ok_or(FeedError::MissingField { shape: "okx_liquidation", field: "side" })?;
    let side = if raw_side == "buy" { PositionSide::Short } else { PositionSide::Long };
    Ok(LiquidationEvent { exchange: Exchange::Okx, ts, side, usd_value: price * qty })
}

/// Trade/liquidation timestamps are not floored to the minute at parse time;
/// the bucket aggregator floors when it computes the bucket key. This helper
/// just normalizes the raw wire value so callers always work in millis.
fn floor_sub_minute(ts_ms: i64) -> i64 {
    ts_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_binance_ws_kline() {
        let value = json!({"k": {"t": 60_000, "o": "1", "h": "2", "l": "0.5", "c": "1.5", "v": "10"}});
        let sample = parse_kline(Exchange::Binance, "BTC", &value).unwrap();
        assert_eq!(sample.ts, 60_000);
        assert_eq!(sample.c, Some(1.5));
        assert!(sample.perpspec.contains("bin-ohlcv"));
    }

    #[test]
    fn parses_okx_ws_candle() {
        let row = json!(["60000", "1", "2", "0.5", "1.5", "10", "10", "10", "1"]);
        let value = json!({"data": [row]});
        let sample = parse_kline(Exchange::Okx, "BTC", &value).unwrap();
        assert_eq!(sample.ts, 60_000);
        assert_eq!(sample.o, Some(1.0));
    }

    #[test]
    fn binance_taker_buy_when_not_buyer_maker() {
        let value = json!({"T": 1000, "p": "10", "q": "2", "m": false});
        let trade = parse_binance_trade(&value).unwrap();
        assert_eq!(trade.side, TakerSide::Buy);
        assert_eq!(trade.usd_value, 20.0);
    }

    #[test]
    fn binance_liquidation_buy_inverts_to_short() {
        let value = json!({"o": {"T": 1000, "S": "BUY", "p": "10", "q": "5"}});
        let liq = parse_binance_liquidation(&value).unwrap();
        assert_eq!(liq.side, PositionSide::Short);
        assert_eq!(liq.usd_value, 50.0);
    }

    #[test]
    fn bybit_liquidation_buy_maps_to_long() {
        let value = json!({"T": 1000, "side": "Buy", "price": "10", "size": "5"});
        let liq = parse_bybit_liquidation(&value).unwrap();
        assert_eq!(liq.side, PositionSide::Long);
    }

    #[test]
    fn okx_liquidation_buy_maps_to_short() {
        let value = json!({"ts": "1000", "side": "buy", "bkPx": "10", "sz": "5"});
        let liq = parse_okx_liquidation(&value).unwrap();
        assert_eq!(liq.side, PositionSide::Short);
    }
}
