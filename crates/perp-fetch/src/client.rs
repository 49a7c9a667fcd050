//! Direct vs. proxy HTTP client pool.
//!
//! Proxy support is plain HTTP/HTTPS with basic auth, used interchangeably
//! with a direct connection; callers pick a [`ConnKind`] per request (e.g. to
//! spread load across both, or to fall back to proxy after repeated direct
//! rate-limiting).

use crate::error::{FetchError, FetchResult};
use reqwest::Client;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which connection path to use for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnKind {
    Direct,
    Proxy,
}

impl ConnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnKind::Direct => "direct",
            ConnKind::Proxy => "proxy",
        }
    }
}

/// Proxy connection settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// A pair of HTTP clients: one direct, one (optionally) routed through a
/// proxy. Both share the same timeout.
pub struct ClientPool {
    direct: Client,
    proxy: Option<Client>,
}

impl ClientPool {
    pub fn new(proxy: Option<ProxyConfig>) -> FetchResult<Self> {
        let direct = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(FetchError::Http)?;

        let proxy = proxy
            .map(|cfg| {
                let proxy = reqwest::Proxy::all(&cfg.url)
                    .map_err(FetchError::Http)?
                    .basic_auth(&cfg.username, &cfg.password);
                Client::builder()
                    .timeout(DEFAULT_TIMEOUT)
                    .proxy(proxy)
                    .build()
                    .map_err(FetchError::Http)
            })
            .transpose()?;

        Ok(Self { direct, proxy })
    }

    /// Resolve the client for a [`ConnKind`], falling back to direct if no
    /// proxy is configured.
    pub fn get(&self, kind: ConnKind) -> &Client {
        match kind {
            ConnKind::Direct => &self.direct,
            ConnKind::Proxy => self.proxy.as_ref().unwrap_or(&self.direct),
        }
    }

    pub fn has_proxy(&self) -> bool {
        self.proxy.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_direct_without_proxy() {
        let pool = ClientPool::new(None).unwrap();
        assert!(!pool.has_proxy());
        let _ = pool.get(ConnKind::Proxy); // must not panic
    }
}
