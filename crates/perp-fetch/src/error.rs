//! Fetcher error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("server error (HTTP {status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("exhausted retries for {endpoint}")]
    RetriesExhausted { endpoint: String },
}

pub type FetchResult<T> = Result<T, FetchError>;
