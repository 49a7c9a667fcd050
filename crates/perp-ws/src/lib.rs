//! Per-venue WebSocket collectors for the perp market-data pipeline.
//!
//! One durable session per (venue, channel): subscribe, ping/pong,
//! confirmed-candle filtering, and reconnect-with-backoff. Liquidation and
//! trade channels are never confirm-filtered; only kline channels are.

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod rate_limiter;
pub mod subscription;
pub mod venue;

pub use connection::{CollectorConfig, CollectorState, WsCollector};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatManager;
pub use message::{classify, RawFrame, WsEvent};
pub use rate_limiter::RateLimiter;
pub use subscription::SubscriptionTracker;
pub use venue::{dialect_for, ChannelKind, VenueDialect};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider. Must be called before any WebSocket
/// connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
