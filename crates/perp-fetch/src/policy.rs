//! Per-venue-endpoint rate-limit policy.
//!
//! Config is per (venue, endpoint): base URL, max page size, a `connKind`-
//! dependent page-delay distribution, request timeout, and a [`RetryPolicy`].
//! The fetcher is parameterized by this value rather than by ambient
//! constants.

use crate::client::ConnKind;
use crate::retry::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// Page-delay ceiling for each connection kind; a direct connection is
/// typically throttled harder than a proxied one since all direct traffic
/// shares the operator's own IP.
#[derive(Debug, Clone, Copy)]
pub struct PageDelay {
    pub direct_ms: u64,
    pub proxy_ms: u64,
}

impl PageDelay {
    pub const fn new(direct_ms: u64, proxy_ms: u64) -> Self {
        Self { direct_ms, proxy_ms }
    }

    pub fn for_kind(&self, kind: ConnKind) -> u64 {
        match kind {
            ConnKind::Direct => self.direct_ms,
            ConnKind::Proxy => self.proxy_ms,
        }
    }
}

/// Static per-(venue, endpoint) configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: &'static str,
    pub max_page_size: u32,
    pub page_delay: PageDelay,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl EndpointConfig {
    pub fn new(base_url: &'static str, max_page_size: u32) -> Self {
        Self {
            base_url,
            max_page_size,
            page_delay: PageDelay::new(200, 400),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_page_delay(mut self, page_delay: PageDelay) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Sleep `uniform(0, pageDelay)` before issuing the next paged request.
/// A zero ceiling is a no-op rather than a degenerate range.
pub async fn jittered_page_delay(config: &EndpointConfig, kind: ConnKind) {
    let ceiling = config.page_delay.for_kind(kind);
    if ceiling == 0 {
        return;
    }
    let wait_ms = rand::thread_rng().gen_range(0..=ceiling);
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_delay_resolves_by_conn_kind() {
        let delay = PageDelay::new(100, 250);
        assert_eq!(delay.for_kind(ConnKind::Direct), 100);
        assert_eq!(delay.for_kind(ConnKind::Proxy), 250);
    }
}
