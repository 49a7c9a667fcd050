//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fetch error: {0}")]
    Fetch(#[from] perp_fetch::FetchError),

    #[error("websocket error: {0}")]
    Ws(#[from] perp_ws::WsError),

    #[error("feed error: {0}")]
    Feed(#[from] perp_feed::FeedError),

    #[error("storage error: {0}")]
    Storage(#[from] perp_storage::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
