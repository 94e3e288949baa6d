use thiserror::Error;

/// Errors from the key-value store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
