//! Pooled connections to the shared Redis store.

mod pool;

use std::time::Duration;

use deadpool::{
    Runtime,
    managed::{Object, Pool},
};
use mailprobe_common::CoordConfig;

use crate::error::StoreError;

#[derive(Debug)]
pub struct RedisConnectionManager {
    client: redis::Client,
    timeout: Duration,
}

/// A connection pool plus the key namespace every backend writes under.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
    prefix: String,
}

impl RedisStore {
    /// Opens a pool against `url` and checks the server answers `PING`.
    ///
    /// A malformed URL is reported as [`StoreError::InvalidUrl`] and will
    /// never succeed on retry; every other error may.
    pub async fn connect(url: &str, config: &CoordConfig) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|err| StoreError::InvalidUrl(err.to_string()))?;
        let timeout = config.connect_timeout();

        let pool = Pool::builder(RedisConnectionManager { client, timeout })
            .runtime(Runtime::Tokio1)
            .max_size(config.pool_max_size.max(1))
            .create_timeout(Some(timeout))
            .wait_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .build()
            .map_err(|err| StoreError::Pool(err.to_string()))?;

        let store = Self {
            pool,
            prefix: config.key_prefix.clone(),
        };
        store.ping().await?;

        Ok(store)
    }

    pub async fn connection(&self) -> Result<Object<RedisConnectionManager>, StoreError> {
        Ok(self.pool.get().await?)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    /// `{prefix}:{suffix}`
    #[must_use]
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.prefix)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("pool", &self.pool.status())
            .finish()
    }
}
