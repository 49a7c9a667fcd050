//! Rate limiting for outbound WebSocket messages.
//!
//! Token bucket used to pace subscription chunks and keep reconnect storms
//! from hammering a venue's public endpoint.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Token bucket rate limiter.
pub struct RateLimiter {
    /// Maximum messages per window.
    max_messages: u32,
    /// Window size in seconds.
    window_secs: u64,
    /// Timestamps of recent messages.
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `max_messages` - Maximum messages per window
    /// * `window_secs` - Window size in seconds
    pub fn new(max_messages: u32, window_secs: u64) -> Self {
        Self {
            max_messages,
            window_secs,
            timestamps: Arc::new(Mutex::new(VecDeque::with_capacity(max_messages as usize))),
        }
    }

    /// Check if we can send a message.
    pub fn can_send(&self) -> bool {
        self.cleanup_old_timestamps();

        let timestamps = self.timestamps.lock();
        timestamps.len() < self.max_messages as usize
    }

    /// Record a message send.
    pub fn record_send(&self) {
        self.cleanup_old_timestamps();

        let mut timestamps = self.timestamps.lock();
        timestamps.push_back(Instant::now());

        if timestamps.len() >= self.max_messages as usize {
            warn!(
                count = timestamps.len(),
                max = self.max_messages,
                "Approaching rate limit"
            );
        }
    }

    /// Get current message count in window.
    pub fn current_count(&self) -> u32 {
        self.cleanup_old_timestamps();
        self.timestamps.lock().len() as u32
    }

    /// Get remaining capacity.
    pub fn remaining_capacity(&self) -> u32 {
        self.max_messages.saturating_sub(self.current_count())
    }

    /// Wait until we can send a message.
    pub async fn wait_for_capacity(&self) {
        while !self.can_send() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn cleanup_old_timestamps(&self) {
        let window = Duration::from_secs(self.window_secs);
        let cutoff = Instant::now() - window;

        let mut timestamps = self.timestamps.lock();
        while timestamps.front().is_some_and(|&t| t < cutoff) {
            timestamps.pop_front();
        }
    }

    /// Reset rate limiter state.
    pub fn reset(&self) {
        self.timestamps.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(10, 60);

        assert!(limiter.can_send());
        assert_eq!(limiter.current_count(), 0);

        for _ in 0..5 {
            limiter.record_send();
        }

        assert!(limiter.can_send());
        assert_eq!(limiter.current_count(), 5);
        assert_eq!(limiter.remaining_capacity(), 5);
    }

    #[test]
    fn test_rate_limiter_at_limit() {
        let limiter = RateLimiter::new(5, 60);

        for _ in 0..5 {
            limiter.record_send();
        }

        assert!(!limiter.can_send());
        assert_eq!(limiter.remaining_capacity(), 0);
    }
}
