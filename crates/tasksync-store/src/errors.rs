//! Store error types.

use thiserror::Error;

/// Failures inside a store backend.
///
/// Only used internally: public store methods log these and degrade.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis command or connection failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// A stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
