//! Live WebSocket collection (C4/C9 integration).
//!
//! One [`WsCollector`] session per (venue, channel); one consumer task per
//! session applies C1/C2 (the collector already hands back a canonical-minute
//! timestamp and a venue symbol) and routes the frame onward: kline frames are
//! merged and upserted directly (they're already one-row-per-minute), trade
//! and liquidation frames feed the shared [`BucketAggregator`] that the
//! flush ticker in `app.rs` drains on its own schedule.

use crate::synthetic_index;
use perp_core::{from_venue_symbol, to_venue_symbol, Exchange, SymbolCase};
use perp_feed::{
    merge_partials, parse_binance_liquidation, parse_binance_trade, parse_bybit_liquidation,
    parse_bybit_trade, parse_kline, parse_okx_liquidation, parse_okx_trade, parse_rsi,
    BucketAggregator, RsiCalculator,
};
use perp_storage::StorageGateway;
use perp_telemetry::StatusSink;
use perp_ws::{ChannelKind, CollectorConfig, RawFrame, WsCollector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, warn};

const ALL_CHANNELS: [ChannelKind; 3] = [ChannelKind::Kline, ChannelKind::Trade, ChannelKind::Liquidation];
const FRAME_BUFFER: usize = 4096;
const KLINE_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

pub struct Collectors<S: StatusSink> {
    gateway: Arc<StorageGateway>,
    bucket: Arc<BucketAggregator>,
    status_sink: Arc<S>,
    mt_basket: Vec<String>,
}

impl<S: StatusSink + 'static> Collectors<S> {
    pub fn new(
        gateway: Arc<StorageGateway>,
        bucket: Arc<BucketAggregator>,
        status_sink: Arc<S>,
        mt_basket: Vec<String>,
    ) -> Self {
        Self { gateway, bucket, status_sink, mt_basket }
    }

    /// Spawn one collector + consumer pair per (venue, channel) for every
    /// venue this pipeline speaks to. Every collector shares the same
    /// `shutdown_rx`; the caller awaits the returned handles to drain cleanly.
    pub fn spawn_all(&self, symbols: &[String], stagger_ms: u64, shutdown_rx: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for exchange in Exchange::ALL {
            let venue_symbols: Vec<String> =
                symbols.iter().map(|s| to_venue_symbol(s, exchange, SymbolCase::Upper)).collect();
            for channel in ALL_CHANNELS {
                let (tx, rx) = mpsc::channel(FRAME_BUFFER);
                let mut config = CollectorConfig::new(exchange, channel, venue_symbols.clone());
                config.subscribe_stagger_ms = stagger_ms;
                let collector = WsCollector::new(config, self.status_sink.clone(), tx);
                let shutdown = shutdown_rx.clone();

                handles.push(tokio::spawn(async move {
                    if let Err(e) = collector.run(shutdown).await {
                        error!(%exchange, channel = channel.as_str(), error = %e, "collector exited");
                    }
                }));

                let symbols = symbols.to_vec();
                match channel {
                    ChannelKind::Kline => {
                        let gateway = self.gateway.clone();
                        let mt_basket = self.mt_basket.clone();
                        handles.push(tokio::spawn(consume_klines(exchange, rx, gateway, symbols, mt_basket)));
                    }
                    ChannelKind::Trade | ChannelKind::Liquidation => {
                        let bucket = self.bucket.clone();
                        handles.push(tokio::spawn(consume_events(exchange, channel, rx, bucket, symbols)));
                    }
                }
            }
        }
        handles
    }
}

/// Map a frame's venue instrument id back to the canonical symbol, dropping
/// it if the mapper misses or it isn't in our universe. A mapper miss is
/// sparse-feed policy for the caller, not an error.
fn resolve_symbol(exchange: Exchange, frame: &RawFrame, universe: &[String]) -> Option<String> {
    let symbol = from_venue_symbol(&frame.symbol, exchange)?;
    universe.iter().any(|s| s.eq_ignore_ascii_case(&symbol)).then_some(symbol)
}

/// Per-symbol RSI state for the live Binance kline stream. RSI is
/// Binance-only: the other venues never populate `rsi1`/`rsi60`, so no state
/// is kept for them.
#[derive(Default)]
struct BinanceRsiState {
    rsi1: RsiCalculator,
    rsi60: RsiCalculator,
}

/// Pushes `sample`'s close through the symbol's calculators and returns an
/// RSI-tagged partial for `merge_partials` to fold back into the same row,
/// or `None` while either calculator is still warming up.
fn update_binance_rsi(
    state: &mut HashMap<String, BinanceRsiState>,
    symbol: &str,
    sample: &perp_core::PerpSample,
) -> Option<perp_core::PerpSample> {
    let close = sample.c?;
    let entry = state.entry(symbol.to_string()).or_default();
    let rsi1 = entry.rsi1.push(close);
    let rsi60 = if sample.ts % (60 * 60_000) == 0 { entry.rsi60.push(close) } else { None };
    if rsi1.is_none() && rsi60.is_none() {
        return None;
    }
    Some(parse_rsi(Exchange::Binance, symbol, sample.ts, rsi1, rsi60))
}

async fn consume_klines(
    exchange: Exchange,
    mut rx: mpsc::Receiver<RawFrame>,
    gateway: Arc<StorageGateway>,
    universe: Vec<String>,
    mt_basket: Vec<String>,
) {
    let mut pending = Vec::new();
    let mut rsi_state: HashMap<String, BinanceRsiState> = HashMap::new();
    let mut flush = tokio::time::interval(KLINE_FLUSH_INTERVAL);

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let Some(symbol) = resolve_symbol(exchange, &frame, &universe) else { continue };
                match parse_kline(exchange, &symbol, &frame.payload) {
                    Ok(sample) => {
                        if exchange == Exchange::Binance {
                            if let Some(rsi_partial) = update_binance_rsi(&mut rsi_state, &symbol, &sample) {
                                pending.push(rsi_partial);
                            }
                        }
                        pending.push(sample);
                    }
                    Err(e) => warn!(error = %e, %exchange, %symbol, "kline parse failed"),
                }
            }
            _ = flush.tick() => {
                flush_klines(exchange, &gateway, &mut pending, &mt_basket).await;
            }
        }
    }
    flush_klines(exchange, &gateway, &mut pending, &mt_basket).await;
}

async fn flush_klines(
    exchange: Exchange,
    gateway: &StorageGateway,
    pending: &mut Vec<perp_core::PerpSample>,
    mt_basket: &[String],
) {
    if pending.is_empty() {
        return;
    }
    let mut batch = merge_partials(std::mem::take(pending));
    let mt_rows = synthetic_index::derive_mt_rows(&batch, mt_basket);
    batch.extend(mt_rows);
    if let Err(e) = gateway.upsert_samples(&batch).await {
        warn!(error = %e, %exchange, rows = batch.len(), "kline batch upsert failed");
    }
}

async fn consume_events(
    exchange: Exchange,
    channel: ChannelKind,
    mut rx: mpsc::Receiver<RawFrame>,
    bucket: Arc<BucketAggregator>,
    universe: Vec<String>,
) {
    while let Some(frame) = rx.recv().await {
        let Some(symbol) = resolve_symbol(exchange, &frame, &universe) else { continue };
        match channel {
            ChannelKind::Trade => {
                let parsed = match exchange {
                    Exchange::Binance => parse_binance_trade(&frame.payload),
                    Exchange::Bybit => parse_bybit_trade(&frame.payload),
                    Exchange::Okx => parse_okx_trade(&frame.payload),
                };
                match parsed {
                    Ok(trade) => bucket.record_trade(&symbol, trade),
                    Err(e) => warn!(error = %e, %exchange, %symbol, "trade parse failed"),
                }
            }
            ChannelKind::Liquidation => {
                let parsed = match exchange {
                    Exchange::Binance => parse_binance_liquidation(&frame.payload),
                    Exchange::Bybit => parse_bybit_liquidation(&frame.payload),
                    Exchange::Okx => parse_okx_liquidation(&frame.payload),
                };
                match parsed {
                    Ok(liq) => bucket.record_liquidation(&symbol, liq),
                    Err(e) => warn!(error = %e, %exchange, %symbol, "liquidation parse failed"),
                }
            }
            ChannelKind::Kline => unreachable!("kline frames are routed to consume_klines"),
        }
    }
}
