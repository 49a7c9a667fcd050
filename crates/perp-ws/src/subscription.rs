//! Per-venue subscription tracking and the per-minute "pull-complete" signal.
//!
//! Tracks which symbols in a session's universe have acked their
//! subscription and which have delivered at least one confirmed sample for
//! the current minute. Reconnecting clears both sets: acks must be
//! re-requested, and Bybit's per-symbol activeness set in particular must
//! not survive a reconnect.

use std::collections::HashSet;

/// Tracks subscription acks and per-minute freshness for one (venue, channel)
/// session's symbol universe.
pub struct SubscriptionTracker {
    universe: Vec<String>,
    acked: HashSet<String>,
    seen_this_minute: HashSet<String>,
}

impl SubscriptionTracker {
    pub fn new(universe: Vec<String>) -> Self {
        Self {
            universe,
            acked: HashSet::new(),
            seen_this_minute: HashSet::new(),
        }
    }

    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    /// Record a successful subscribe ack. Bybit/OKX ack per chunk rather
    /// than per symbol, so callers that can't attribute an ack to specific
    /// symbols should call [`Self::ack_all`] instead.
    pub fn ack(&mut self, symbol: &str) {
        self.acked.insert(symbol.to_string());
    }

    pub fn ack_all(&mut self) {
        self.acked = self.universe.iter().cloned().collect();
    }

    pub fn is_fully_subscribed(&self) -> bool {
        self.universe.iter().all(|s| self.acked.contains(s))
    }

    /// Mark a symbol as having delivered a confirmed sample for the current
    /// minute. Returns `true` if this was the last symbol needed to
    /// complete the minute, in which case the caller should emit a
    /// pull-complete heartbeat and call [`Self::reset_minute`].
    pub fn mark_seen(&mut self, symbol: &str) -> bool {
        if !self.universe.iter().any(|s| s == symbol) {
            return false;
        }
        self.seen_this_minute.insert(symbol.to_string());
        self.seen_this_minute.len() >= self.universe.len()
    }

    pub fn reset_minute(&mut self) {
        self.seen_this_minute.clear();
    }

    /// Clear all subscription and freshness state, for a reconnect.
    pub fn reset_all(&mut self) {
        self.acked.clear();
        self.seen_this_minute.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> Vec<String> {
        vec!["BTCUSDT".into(), "ETHUSDT".into()]
    }

    #[test]
    fn fully_subscribed_requires_every_symbol_acked() {
        let mut t = SubscriptionTracker::new(universe());
        assert!(!t.is_fully_subscribed());
        t.ack("BTCUSDT");
        assert!(!t.is_fully_subscribed());
        t.ack("ETHUSDT");
        assert!(t.is_fully_subscribed());
    }

    #[test]
    fn pull_complete_fires_once_every_symbol_seen() {
        let mut t = SubscriptionTracker::new(universe());
        assert!(!t.mark_seen("BTCUSDT"));
        assert!(t.mark_seen("ETHUSDT"));
    }

    #[test]
    fn reset_minute_clears_freshness_not_acks() {
        let mut t = SubscriptionTracker::new(universe());
        t.ack_all();
        t.mark_seen("BTCUSDT");
        t.mark_seen("ETHUSDT");
        t.reset_minute();
        assert!(t.is_fully_subscribed());
        assert!(!t.mark_seen("BTCUSDT"));
    }

    #[test]
    fn reset_all_clears_acks_for_reconnect() {
        let mut t = SubscriptionTracker::new(universe());
        t.ack_all();
        t.reset_all();
        assert!(!t.is_fully_subscribed());
    }

    #[test]
    fn unknown_symbol_never_completes_minute() {
        let mut t = SubscriptionTracker::new(universe());
        assert!(!t.mark_seen("SOLUSDT"));
    }
}
