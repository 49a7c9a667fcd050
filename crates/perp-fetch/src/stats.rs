//! Fetcher stats snapshot, exposed for heartbeat logging.

use crate::client::ConnKind;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default)]
pub struct FetchStatsSnapshot {
    pub requests_direct: u64,
    pub requests_proxy: u64,
    pub rate_limited_total: u64,
    pub affected_symbols: Vec<String>,
}

/// Running counters for the fetcher, read out as a snapshot for heartbeats.
#[derive(Default)]
pub struct FetchStats {
    requests_direct: AtomicU64,
    requests_proxy: AtomicU64,
    rate_limited_total: AtomicU64,
    affected_symbols: Mutex<HashSet<String>>,
    #[allow(dead_code)]
    by_endpoint: Mutex<HashMap<String, u64>>,
}

impl FetchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, kind: ConnKind) {
        match kind {
            ConnKind::Direct => self.requests_direct.fetch_add(1, Ordering::Relaxed),
            ConnKind::Proxy => self.requests_proxy.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_rate_limited(&self, symbol: &str) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
        self.affected_symbols.lock().insert(symbol.to_string());
    }

    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            requests_direct: self.requests_direct.load(Ordering::Relaxed),
            requests_proxy: self.requests_proxy.load(Ordering::Relaxed),
            rate_limited_total: self.rate_limited_total.load(Ordering::Relaxed),
            affected_symbols: self.affected_symbols.lock().iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_requests_per_conn_kind() {
        let stats = FetchStats::new();
        stats.record_request(ConnKind::Direct);
        stats.record_request(ConnKind::Direct);
        stats.record_request(ConnKind::Proxy);
        let snap = stats.snapshot();
        assert_eq!(snap.requests_direct, 2);
        assert_eq!(snap.requests_proxy, 1);
    }

    #[test]
    fn tracks_rate_limited_symbols() {
        let stats = FetchStats::new();
        stats.record_rate_limited("BTCUSDT");
        stats.record_rate_limited("BTCUSDT");
        stats.record_rate_limited("ETHUSDT");
        let snap = stats.snapshot();
        assert_eq!(snap.rate_limited_total, 3);
        assert_eq!(snap.affected_symbols.len(), 2);
    }
}
