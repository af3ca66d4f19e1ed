//! Bus error types.

use thiserror::Error;

/// Broker-level failures.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker link has not been established (or was released).
    #[error("broker not connected")]
    NotConnected,
    /// Redis rejected the command or the connection dropped.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The message could not be serialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
