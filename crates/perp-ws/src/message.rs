//! Classification of raw WebSocket text frames into control vs. data events.
//!
//! Full OHLCV/trade/liquidation field extraction happens downstream in the
//! bucket aggregator, which already knows each venue's payload shape; this
//! module only answers the questions the collector's state machine needs:
//! is this a pong, a subscribe ack, or a data frame — and if a data frame,
//! which channel and symbol, and (for klines) is it confirmed.

use crate::venue::{ChannelKind, VenueDialect};
use serde_json::Value;

/// One classified inbound frame.
#[derive(Clone)]
pub enum WsEvent {
    /// Venue-level keepalive pong.
    Pong,
    /// Acknowledgement of a subscribe request.
    SubscribeAck { success: bool, detail: Option<String> },
    /// A data frame on a known channel.
    Data(RawFrame),
    /// A kline frame for `symbol` that was dropped for not being confirmed/closed.
    DroppedUnconfirmed { symbol: String },
    /// Anything else (e.g. unrelated control chatter); ignored upstream.
    Ignored,
}

/// A data frame, already confirm-filtered for klines.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub channel: ChannelKind,
    pub symbol: String,
    pub payload: Value,
}

/// Classify a raw text frame using the venue's dialect.
///
/// `channel` and `symbols` are the channel/universe this session was opened
/// for, used to tag data frames and to recognize subscribe acks.
pub fn classify(
    dialect: &dyn VenueDialect,
    channel: ChannelKind,
    text: &str,
) -> WsEvent {
    if dialect.exchange() == perp_core::Exchange::Okx && text == "pong" {
        return WsEvent::Pong;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return WsEvent::Ignored,
    };

    if dialect.is_pong(&value) {
        return WsEvent::Pong;
    }

    if let Some(ack) = parse_subscribe_ack(&value) {
        return ack;
    }

    match symbol_for(channel, &value) {
        Some(symbol) => {
            if channel.requires_confirmation() && !dialect.is_confirmed_candle(&value) {
                return WsEvent::DroppedUnconfirmed { symbol };
            }
            WsEvent::Data(RawFrame { channel, symbol, payload: value })
        }
        None => WsEvent::Ignored,
    }
}

/// Recognize a subscribe ack across the three venue shapes:
/// Binance `{"result":null,"id":1}` (success) or `{"error":{...},"id":1}`;
/// Bybit `{"op":"subscribe","success":true,...}`;
/// OKX `{"event":"subscribe","arg":{...}}` or `{"event":"error",...}`.
fn parse_subscribe_ack(value: &Value) -> Option<WsEvent> {
    if value.get("id").is_some() && value.get("result").is_some() {
        return Some(WsEvent::SubscribeAck { success: value["result"].is_null(), detail: None });
    }
    if let Some(err) = value.get("error") {
        if value.get("id").is_some() {
            return Some(WsEvent::SubscribeAck {
                success: false,
                detail: Some(err.to_string()),
            });
        }
    }
    if value.get("op").and_then(Value::as_str) == Some("subscribe") {
        let success = value.get("success").and_then(Value::as_bool).unwrap_or(true);
        let detail = value.get("ret_msg").and_then(Value::as_str).map(str::to_string);
        return Some(WsEvent::SubscribeAck { success, detail });
    }
    match value.get("event").and_then(Value::as_str) {
        Some("subscribe") => Some(WsEvent::SubscribeAck { success: true, detail: None }),
        Some("error") => Some(WsEvent::SubscribeAck {
            success: false,
            detail: value.get("msg").and_then(Value::as_str).map(str::to_string),
        }),
        _ => None,
    }
}

/// Extract the instrument symbol from a data frame, per venue/channel shape.
fn symbol_for(channel: ChannelKind, value: &Value) -> Option<String> {
    // Binance combined/raw stream: {"s": "BTCUSDT", "k": {...}} or top-level "s".
    if let Some(s) = value.get("s").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Some(s) = value.get("k").and_then(|k| k.get("s")).and_then(Value::as_str) {
        return Some(s.to_string());
    }
    // Binance forceOrder (liquidation): {"e": "forceOrder", "o": {"s": "BTCUSDT", ...}}
    if let Some(s) = value.get("o").and_then(|o| o.get("s")).and_then(Value::as_str) {
        return Some(s.to_string());
    }
    // Bybit: {"topic": "kline.1.BTCUSDT", "data": [...]}
    if let Some(topic) = value.get("topic").and_then(Value::as_str) {
        return topic.rsplit('.').next().map(str::to_string);
    }
    // OKX: {"arg": {"instId": "BTC-USDT-SWAP"}, "data": [...]}
    if let Some(inst) = value.get("arg").and_then(|a| a.get("instId")).and_then(Value::as_str) {
        return Some(inst.to_string());
    }
    let _ = channel;
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{Binance, Bybit, Okx};
    use serde_json::json;

    #[test]
    fn classifies_binance_confirmed_kline() {
        let d = Binance;
        let text = json!({"s": "BTCUSDT", "k": {"x": true}}).to_string();
        match classify(&d, ChannelKind::Kline, &text) {
            WsEvent::Data(frame) => assert_eq!(frame.symbol, "BTCUSDT"),
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn drops_binance_unconfirmed_kline() {
        let d = Binance;
        let text = json!({"s": "BTCUSDT", "k": {"x": false}}).to_string();
        assert!(matches!(
            classify(&d, ChannelKind::Kline, &text),
            WsEvent::DroppedUnconfirmed { symbol } if symbol == "BTCUSDT"
        ));
    }

    #[test]
    fn recognizes_bybit_subscribe_ack() {
        let d = Bybit;
        let text = json!({"op": "subscribe", "success": true}).to_string();
        assert!(matches!(
            classify(&d, ChannelKind::Kline, &text),
            WsEvent::SubscribeAck { success: true, .. }
        ));
    }

    #[test]
    fn recognizes_okx_pong() {
        let d = Okx;
        assert!(matches!(classify(&d, ChannelKind::Kline, "pong"), WsEvent::Pong));
    }

    #[test]
    fn liquidation_never_requires_confirmation() {
        let d = Binance;
        let text = json!({"s": "BTCUSDT", "o": {}}).to_string();
        match classify(&d, ChannelKind::Liquidation, &text) {
            WsEvent::Data(frame) => assert_eq!(frame.channel, ChannelKind::Liquidation),
            other => panic!("expected data frame, got {other:?}"),
        }
    }
}

impl std::fmt::Debug for WsEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsEvent::Pong => write!(f, "Pong"),
            WsEvent::SubscribeAck { success, detail } => {
                write!(f, "SubscribeAck{{success: {success}, detail: {detail:?}}}")
            }
            WsEvent::Data(frame) => write!(f, "Data({frame:?})"),
            WsEvent::DroppedUnconfirmed { symbol } => write!(f, "DroppedUnconfirmed({symbol})"),
            WsEvent::Ignored => write!(f, "Ignored"),
        }
    }
}
