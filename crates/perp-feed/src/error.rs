//! Feed error types: parsing per-venue wire payloads into partial samples.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing field {field} in {shape} payload")]
    MissingField { shape: &'static str, field: &'static str },

    #[error(transparent)]
    Core(#[from] perp_core::CoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
