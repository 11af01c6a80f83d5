use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::CacheStore;
use crate::{error::StoreError, store::RedisStore};

/// Cache entries kept in Redis with a millisecond expiry.
#[derive(Debug, Clone)]
pub struct RedisCache {
    store: RedisStore,
}

impl RedisCache {
    #[must_use]
    pub const fn new(store: RedisStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value: Option<Vec<u8>> = self.store.connection().await?.as_mut().get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return self.delete(key).await;
        }

        let _: () = self
            .store
            .connection()
            .await?
            .as_mut()
            .pset_ex(key, value, millis)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _: () = self.store.connection().await?.as_mut().del(key).await?;
        Ok(())
    }
}
