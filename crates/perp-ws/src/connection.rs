//! Per-(venue, channel) WebSocket collector session.
//!
//! Lifecycle state machine:
//! `Disconnected -> Connecting -> Subscribing -> Streaming -> (Draining | Reconnecting) -> Disconnected`.
//!
//! One [`WsCollector`] owns exactly one socket for one venue/channel pair and
//! one symbol universe; the orchestrator spawns one task per collector.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{classify, RawFrame, WsEvent};
use crate::rate_limiter::RateLimiter;
use crate::subscription::SubscriptionTracker;
use crate::venue::{dialect_for, ChannelKind, VenueDialect};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use perp_core::Exchange;
use perp_telemetry::{Heartbeat, HeartbeatStatus, Metrics, StatusSink, StructuredError};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Collector session configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub exchange: Exchange,
    pub channel: ChannelKind,
    /// Canonical symbols (already venue-mapped, e.g. `BTCUSDT`/`BTC-USDT-SWAP`).
    pub symbols: Vec<String>,
    /// Delay before re-entering `Connecting` after an error or close.
    pub reconnect_delay_secs: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Stagger between Bybit per-instrument subscribe chunks.
    pub subscribe_stagger_ms: u64,
}

impl CollectorConfig {
    pub fn new(exchange: Exchange, channel: ChannelKind, symbols: Vec<String>) -> Self {
        Self {
            exchange,
            channel,
            symbols,
            reconnect_delay_secs: 5,
            heartbeat_interval_ms: 20_000,
            heartbeat_timeout_ms: 10_000,
            subscribe_stagger_ms: 50,
        }
    }
}

/// Collector state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
    Draining,
    Reconnecting,
}

impl CollectorState {
    fn as_str(&self) -> &'static str {
        match self {
            CollectorState::Disconnected => "disconnected",
            CollectorState::Connecting => "connecting",
            CollectorState::Subscribing => "subscribing",
            CollectorState::Streaming => "streaming",
            CollectorState::Draining => "draining",
            CollectorState::Reconnecting => "reconnecting",
        }
    }
}

/// A durable WebSocket session for one (venue, channel) pair.
pub struct WsCollector<S: StatusSink> {
    config: CollectorConfig,
    dialect: Box<dyn VenueDialect>,
    state: Arc<RwLock<CollectorState>>,
    tracker: Arc<RwLock<SubscriptionTracker>>,
    heartbeat: Arc<HeartbeatManager>,
    /// Caps outbound control-frame rate; guards against a reconnect storm
    /// re-subscribing every symbol in one burst.
    send_limiter: RateLimiter,
    frame_tx: mpsc::Sender<RawFrame>,
    status_sink: Arc<S>,
}

impl<S: StatusSink> WsCollector<S> {
    pub fn new(config: CollectorConfig, status_sink: Arc<S>, frame_tx: mpsc::Sender<RawFrame>) -> Self {
        let dialect = dialect_for(config.exchange);
        let tracker = SubscriptionTracker::new(config.symbols.clone());
        let heartbeat = HeartbeatManager::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            dialect,
            state: Arc::new(RwLock::new(CollectorState::Disconnected)),
            tracker: Arc::new(RwLock::new(tracker)),
            heartbeat: Arc::new(heartbeat),
            send_limiter: RateLimiter::new(20, 1),
            frame_tx,
            status_sink,
        }
    }

    pub fn state(&self) -> CollectorState {
        *self.state.read()
    }

    fn set_state(&self, state: CollectorState) {
        *self.state.write() = state;
        Metrics::ws_state_set(self.config.exchange.tag(), self.config.channel.as_str(), state.as_str());
    }

    /// Run the session until `shutdown` fires. Reconnects indefinitely on
    /// error; returns only after a graceful drain.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WsResult<()> {
        loop {
            if *shutdown.borrow() {
                self.set_state(CollectorState::Draining);
                info!(exchange = %self.config.exchange, channel = self.config.channel.as_str(), "draining collector");
                self.set_state(CollectorState::Disconnected);
                return Ok(());
            }

            self.set_state(CollectorState::Connecting);
            self.status_sink
                .heartbeat(Heartbeat::new(self.component_name(), 60, HeartbeatStatus::Connected))
                .await;

            let result = tokio::select! {
                r = self.try_connect() => r,
                _ = shutdown.changed() => Ok(()),
            };

            if *shutdown.borrow() {
                self.set_state(CollectorState::Draining);
                self.set_state(CollectorState::Disconnected);
                return Ok(());
            }

            match result {
                Ok(()) => info!(exchange = %self.config.exchange, "collector socket closed normally"),
                Err(e) => {
                    error!(exchange = %self.config.exchange, ?e, "collector socket error");
                    self.status_sink
                        .error(
                            StructuredError::new(self.component_name(), "ws_error", e.to_string())
                                .with_code(self.config.channel.as_str()),
                        )
                        .await;
                    Metrics::ws_reconnect(self.config.exchange.tag(), self.config.channel.as_str(), error_reason(&e));
                }
            }

            self.set_state(CollectorState::Reconnecting);
            self.tracker.write().reset_all();
            self.reconnect_delay().await;
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        let url = self.dialect.ws_url(self.config.channel);
        info!(url, "connecting");
        let (ws_stream, _response) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();
        self.heartbeat.reset();

        self.set_state(CollectorState::Subscribing);
        let frames = self.dialect.subscribe_frames(self.config.channel, &self.config.symbols);
        for frame in &frames {
            self.send_limiter.wait_for_capacity().await;
            self.send_limiter.record_send();
            write.send(Message::Text(frame.clone())).await?;
            tokio::time::sleep(Duration::from_millis(self.config.subscribe_stagger_ms)).await;
        }
        self.tracker.write().ack_all();

        self.set_state(CollectorState::Streaming);
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (Some(f.code.into()), f.reason.to_string()))
                                .unwrap_or((None, "closed by server".to_string()));
                            warn!(?code, %reason, "socket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            warn!("socket stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                _ = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_heartbeat() {
                        if let Some(ping) = self.dialect.ping_frame() {
                            write.send(Message::Text(ping)).await?;
                        } else {
                            write.send(Message::Ping(Vec::new())).await?;
                        }
                        self.heartbeat.record_ping();
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) -> WsResult<()> {
        match classify(self.dialect.as_ref(), self.config.channel, text) {
            WsEvent::Pong => self.heartbeat.record_pong(),
            WsEvent::SubscribeAck { success, detail } => {
                if !success {
                    warn!(?detail, exchange = %self.config.exchange, "subscription ack failure");
                    self.status_sink
                        .error(StructuredError::new(
                            self.component_name(),
                            "subscribe_nack",
                            detail.unwrap_or_else(|| "subscribe rejected".to_string()),
                        ))
                        .await;
                }
                // A failed ack is logged but does not tear down the session:
                // other symbols in the same socket may still be live.
            }
            WsEvent::Data(frame) => {
                Metrics::ws_candle_received(self.config.exchange.tag(), &frame.symbol);
                let symbol = frame.symbol.clone();
                if self.frame_tx.send(frame).await.is_err() {
                    warn!("frame receiver dropped");
                }
                let pull_complete = self.tracker.write().mark_seen(&symbol);
                if pull_complete {
                    debug!(exchange = %self.config.exchange, channel = self.config.channel.as_str(), "pull complete for minute");
                    self.status_sink
                        .heartbeat(Heartbeat::new(self.component_name(), 60, HeartbeatStatus::Running))
                        .await;
                    self.tracker.write().reset_minute();
                }
            }
            WsEvent::DroppedUnconfirmed { symbol } => {
                Metrics::ws_candle_dropped_unconfirmed(self.config.exchange.tag(), &symbol);
            }
            WsEvent::Ignored => {}
        }
        Ok(())
    }

    async fn reconnect_delay(&self) {
        let jitter_ms: u64 = rand::thread_rng().gen_range(0..500);
        let delay = Duration::from_secs(self.config.reconnect_delay_secs) + Duration::from_millis(jitter_ms);
        warn!(delay_ms = delay.as_millis(), "reconnecting");
        tokio::time::sleep(delay).await;
    }

    fn component_name(&self) -> String {
        format!("ws:{}:{}", self.config.exchange.tag(), self.config.channel.as_str())
    }
}

fn error_reason(e: &WsError) -> &'static str {
    match e {
        WsError::HeartbeatTimeout => "heartbeat_timeout",
        WsError::ConnectionClosed { .. } => "closed",
        WsError::Tungstenite(_) => "transport",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_five_second_reconnect() {
        let config = CollectorConfig::new(Exchange::Binance, ChannelKind::Kline, vec!["BTCUSDT".into()]);
        assert_eq!(config.reconnect_delay_secs, 5);
    }

    #[test]
    fn state_labels_are_stable() {
        assert_eq!(CollectorState::Streaming.as_str(), "streaming");
        assert_eq!(CollectorState::Reconnecting.as_str(), "reconnecting");
    }
}
