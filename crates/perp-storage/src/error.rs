//! Storage gateway / derived-metrics engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("chunk upsert failed after one retry: {table} ({rows} rows): {source}")]
    ChunkFailed {
        table: &'static str,
        rows: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration error: {0}")]
    Migration(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
