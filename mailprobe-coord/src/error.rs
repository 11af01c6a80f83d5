//! Error types for throttling, caching and the shared store.

use std::time::Duration;

use mailprobe_common::HostKey;
use thiserror::Error;

use crate::throttle::BlockReason;

/// Failures talking to the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid Redis URL: {0}")]
    InvalidUrl(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Timed out connecting to Redis")]
    ConnectTimeout,
}

impl From<deadpool::managed::PoolError<StoreError>> for StoreError {
    fn from(value: deadpool::managed::PoolError<StoreError>) -> Self {
        match value {
            deadpool::managed::PoolError::Backend(err) => err,
            other => Self::Pool(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ThrottleError {
    /// No slot became available before the acquire timeout.
    #[error("Timed out after {waited:?} waiting for a slot on {host} (last blocked by {blocked_by:?})")]
    AcquireTimeout {
        host: HostKey,
        waited: Duration,
        blocked_by: Option<BlockReason>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to encode cache value: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode cache value: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
