//! Retry policy for REST requests. 429/418 ("rate_limit") is a fixed-attempt
//! exponential backoff — the venue is telling us to slow down, and giving up
//! after a bounded number of attempts is the right call. 5xx and transport
//! errors ("transient") get a different treatment per spec: a flat
//! uniform(800,1200)ms sleep, retried indefinitely until a per-call wall-clock
//! budget expires, since a transient outage has no natural attempt count.
//! `cause` on the retry metric distinguishes the two.

use crate::client::ConnKind;
use crate::error::{FetchError, FetchResult};
use crate::stats::FetchStats;
use perp_telemetry::Metrics;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Wall-clock budget for the "transient" (418/5xx/transport-error) path,
    /// independent of `max_attempts`.
    pub transient_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            transient_budget: Duration::from_secs(120),
        }
    }
}

/// Send `request`, retrying on 429/418/5xx per `policy`. The builder must be
/// cloneable (no streaming body), since each attempt needs a fresh request.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
    exchange: &str,
    endpoint: &str,
    stats: &FetchStats,
    conn_kind: ConnKind,
) -> FetchResult<reqwest::Response> {
    let mut attempt = 0u32;
    let mut transient_deadline: Option<Instant> = None;

    loop {
        let req = request.try_clone().ok_or_else(|| {
            FetchError::Config("request body is not cloneable for retry".to_string())
        })?;

        stats.record_request(conn_kind);
        Metrics::fetch_request(exchange, endpoint);

        let start = Instant::now();
        let outcome = req.send().await;
        Metrics::fetch_latency(exchange, endpoint, start.elapsed().as_millis() as f64);

        match outcome {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) => {
                let status = resp.status().as_u16();
                match status {
                    429 | 418 => {
                        attempt += 1;
                        if attempt >= policy.max_attempts {
                            return Err(FetchError::RetriesExhausted { endpoint: endpoint.to_string() });
                        }
                        Metrics::fetch_retry(exchange, endpoint, "rate_limit");
                        stats.record_rate_limited(endpoint);
                        warn!(exchange, endpoint, status, attempt, cause = "rate_limit", "retrying after backoff");
                        backoff_sleep(policy, attempt).await;
                    }
                    500..=599 => {
                        let deadline = *transient_deadline.get_or_insert_with(|| Instant::now() + policy.transient_budget);
                        if Instant::now() >= deadline {
                            return Err(FetchError::RetriesExhausted { endpoint: endpoint.to_string() });
                        }
                        Metrics::fetch_retry(exchange, endpoint, "transient");
                        warn!(exchange, endpoint, status, cause = "transient", "retrying after transient backoff");
                        transient_sleep().await;
                    }
                    _ => {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(FetchError::ServerError { status, body });
                    }
                }
            }
            Err(e) => {
                let deadline = *transient_deadline.get_or_insert_with(|| Instant::now() + policy.transient_budget);
                if Instant::now() >= deadline {
                    return Err(e.into());
                }
                Metrics::fetch_retry(exchange, endpoint, "transient");
                warn!(exchange, endpoint, error = %e, cause = "transient", "retrying after transport error");
                transient_sleep().await;
            }
        }
    }
}

async fn backoff_sleep(policy: &RetryPolicy, attempt: u32) {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = policy.base_delay_ms.saturating_mul(1u64 << exponent).min(policy.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..250);
    tokio::time::sleep(Duration::from_millis(delay + jitter)).await;
}

/// Flat uniform(800,1200)ms sleep for the transient (418/5xx/transport-error)
/// retry path — no exponent, since the budget (not the attempt count) bounds
/// how long this can run.
async fn transient_sleep() {
    let delay = rand::thread_rng().gen_range(800..=1200);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_caps_at_five_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts, 5);
    }

    #[test]
    fn default_transient_budget_is_two_minutes() {
        assert_eq!(RetryPolicy::default().transient_budget, Duration::from_secs(120));
    }
}
