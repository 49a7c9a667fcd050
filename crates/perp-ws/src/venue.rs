//! Per-venue WebSocket wire conventions: base URLs, subscribe-frame shape,
//! and the confirmed/closed-candle predicate.
//!
//! Each venue speaks a different subscription dialect and a different
//! "is this candle closed" flag, but the state machine in [`crate::connection`]
//! is otherwise identical across venues. Keeping the divergence isolated here
//! is what lets `WsCollector` stay venue-generic.

use perp_core::Exchange;
use serde_json::Value;

/// A WebSocket channel kind. Coinalyze liquidation history and the other
/// REST-only feeds are not represented here; they belong to the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// 1-minute candles.
    Kline,
    /// Raw trade prints, for taker buy/sell volume.
    Trade,
    /// Forced-liquidation events.
    Liquidation,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Kline => "kline",
            ChannelKind::Trade => "trade",
            ChannelKind::Liquidation => "liquidation",
        }
    }

    /// Whether frames on this channel require the closed/confirmed check
    /// before being forwarded to the bucket aggregator.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, ChannelKind::Kline)
    }
}

/// Venue-specific WebSocket conventions.
pub trait VenueDialect: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Public streaming endpoint for this channel.
    fn ws_url(&self, channel: ChannelKind) -> &'static str;

    /// Build one or more subscribe control frames for the given symbols.
    /// Bybit chunks at most 200 instruments per frame; Binance/OKX return a
    /// single multi-argument frame regardless of symbol count.
    fn subscribe_frames(&self, channel: ChannelKind, symbols: &[String]) -> Vec<String>;

    /// Text frame to send for a keepalive ping, if this venue needs an
    /// application-level one (Binance relies on the WS-protocol ping frame
    /// instead and returns `None`).
    fn ping_frame(&self) -> Option<String>;

    /// Whether `value` is this venue's pong/ack reply to [`VenueDialect::ping_frame`].
    fn is_pong(&self, value: &Value) -> bool;

    /// Whether a kline/candle frame represents a closed, confirmed candle.
    fn is_confirmed_candle(&self, value: &Value) -> bool;
}

pub struct Binance;
pub struct Bybit;
pub struct Okx;

impl VenueDialect for Binance {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn ws_url(&self, _channel: ChannelKind) -> &'static str {
        "wss://fstream.binance.com/ws"
    }

    fn subscribe_frames(&self, channel: ChannelKind, symbols: &[String]) -> Vec<String> {
        let stream_suffix = match channel {
            ChannelKind::Kline => "kline_1m",
            ChannelKind::Trade => "aggTrade",
            ChannelKind::Liquidation => "forceOrder",
        };
        let params: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@{stream_suffix}", s.to_lowercase()))
            .collect();
        vec![
            serde_json::json!({
                "method": "SUBSCRIBE",
                "params": params,
                "id": 1,
            })
            .to_string(),
        ]
    }

    fn ping_frame(&self) -> Option<String> {
        // Binance answers WS-protocol ping frames automatically; no
        // application-level ping is required.
        None
    }

    fn is_pong(&self, _value: &Value) -> bool {
        false
    }

    fn is_confirmed_candle(&self, value: &Value) -> bool {
        value
            .get("k")
            .and_then(|k| k.get("x"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl VenueDialect for Bybit {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    fn ws_url(&self, _channel: ChannelKind) -> &'static str {
        "wss://stream.bybit.com/v5/public/linear"
    }

    fn subscribe_frames(&self, channel: ChannelKind, symbols: &[String]) -> Vec<String> {
        let topic_prefix = match channel {
            ChannelKind::Kline => "kline.1",
            ChannelKind::Trade => "publicTrade",
            ChannelKind::Liquidation => "allLiquidation",
        };
        // Bybit requires one subscription args entry per instrument, chunked
        // at most 200 per message; the stagger between chunks is applied by
        // the caller (the collector), not here.
        symbols
            .chunks(200)
            .map(|chunk| {
                let args: Vec<String> = chunk
                    .iter()
                    .map(|s| format!("{topic_prefix}.{s}"))
                    .collect();
                serde_json::json!({ "op": "subscribe", "args": args }).to_string()
            })
            .collect()
    }

    fn ping_frame(&self) -> Option<String> {
        Some(serde_json::json!({ "op": "ping" }).to_string())
    }

    fn is_pong(&self, value: &Value) -> bool {
        value.get("op").and_then(Value::as_str) == Some("pong")
    }

    fn is_confirmed_candle(&self, value: &Value) -> bool {
        value
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("confirm"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl VenueDialect for Okx {
    fn exchange(&self) -> Exchange {
        Exchange::Okx
    }

    fn ws_url(&self, _channel: ChannelKind) -> &'static str {
        "wss://ws.okx.com:8443/ws/v5/public"
    }

    fn subscribe_frames(&self, channel: ChannelKind, symbols: &[String]) -> Vec<String> {
        let channel_name = match channel {
            ChannelKind::Kline => "candle1m",
            ChannelKind::Trade => "trades",
            ChannelKind::Liquidation => "liquidation-orders",
        };
        let args: Vec<Value> = symbols
            .iter()
            .map(|s| serde_json::json!({ "channel": channel_name, "instId": s }))
            .collect();
        vec![serde_json::json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn ping_frame(&self) -> Option<String> {
        Some("ping".to_string())
    }

    fn is_pong(&self, value: &Value) -> bool {
        // OKX replies to a bare "ping" text frame with a bare "pong" text
        // frame, which never reaches here as JSON; the connection layer
        // checks for the raw text instead. Structured pongs never occur.
        value.get("event").and_then(Value::as_str) == Some("pong")
    }

    fn is_confirmed_candle(&self, value: &Value) -> bool {
        value
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.as_array())
            .and_then(|row| row.get(8))
            .and_then(Value::as_str)
            .map(|confirm| confirm == "1")
            .unwrap_or(false)
    }
}

/// Resolve the dialect implementation for an [`Exchange`].
pub fn dialect_for(exchange: Exchange) -> Box<dyn VenueDialect> {
    match exchange {
        Exchange::Binance => Box::new(Binance),
        Exchange::Bybit => Box::new(Bybit),
        Exchange::Okx => Box::new(Okx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binance_confirmed_candle() {
        let d = Binance;
        assert!(d.is_confirmed_candle(&json!({"k": {"x": true}})));
        assert!(!d.is_confirmed_candle(&json!({"k": {"x": false}})));
        assert!(!d.is_confirmed_candle(&json!({"k": {}})));
    }

    #[test]
    fn bybit_confirmed_candle() {
        let d = Bybit;
        assert!(d.is_confirmed_candle(&json!({"data": [{"confirm": true}]})));
        assert!(!d.is_confirmed_candle(&json!({"data": [{"confirm": false}]})));
    }

    #[test]
    fn okx_confirmed_candle() {
        let d = Okx;
        let row = json!(["1", "2", "3", "4", "5", "6", "7", "8", "1"]);
        assert!(d.is_confirmed_candle(&json!({"data": [row]})));
        let row_unconfirmed = json!(["1", "2", "3", "4", "5", "6", "7", "8", "0"]);
        assert!(!d.is_confirmed_candle(&json!({"data": [row_unconfirmed]})));
    }

    #[test]
    fn bybit_subscribe_chunks_at_200() {
        let d = Bybit;
        let symbols: Vec<String> = (0..450).map(|i| format!("SYM{i}USDT")).collect();
        let frames = d.subscribe_frames(ChannelKind::Kline, &symbols);
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn binance_subscribe_single_frame() {
        let d = Binance;
        let symbols: Vec<String> = (0..450).map(|i| format!("SYM{i}USDT")).collect();
        let frames = d.subscribe_frames(ChannelKind::Kline, &symbols);
        assert_eq!(frames.len(), 1);
    }
}
