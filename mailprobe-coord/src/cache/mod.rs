//! TTL cache with a local fallback and an optional shared store.
//!
//! Writes always land in the local cache. Once a distributed store is
//! installed they also go there, and reads prefer it, falling back to the
//! local copy on a miss or an error. Values are encoded with `bincode`.

mod local;
mod redis;

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use bincode::config;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{info, warn};

pub use self::{local::LocalCache, redis::RedisCache};
use crate::{
    error::{CacheError, StoreError},
    switch::BackendSwitch,
};

#[async_trait]
pub trait CacheStore: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn is_distributed(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub struct CacheLayer {
    local: Arc<LocalCache>,
    active: BackendSwitch<dyn CacheStore>,
    prefix: String,
}

impl CacheLayer {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        let local = Arc::new(LocalCache::new());

        Self {
            active: BackendSwitch::new(Arc::clone(&local) as Arc<dyn CacheStore>),
            local,
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub const fn local(&self) -> &Arc<LocalCache> {
        &self.local
    }

    /// Switches reads and writes to `store`. A distributed store takes over
    /// expiry, so the local sweeper stops.
    pub fn install(&self, store: Arc<dyn CacheStore>) {
        let distributed = store.is_distributed();
        let previous = self.active.replace(store);

        if distributed {
            self.local.stop_sweeper();
        }

        info!(
            "Cache backend switched from {} to {}",
            previous.name(),
            self.backend_name()
        );
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.active.current().name()
    }

    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.active.current().is_distributed()
    }

    fn key(&self, key: &str) -> String {
        format!("{}:cache:{key}", self.prefix)
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let bytes = bincode::serde::encode_to_vec(value, config::standard())?;
        let key = self.key(key);

        let active = self.active.current();
        if active.is_distributed()
            && let Err(err) = active.set(&key, bytes.clone(), ttl).await
        {
            warn!(backend = active.name(), "Cache write failed, kept locally: {err}");
        }

        self.local.insert(key, bytes, ttl);
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let key = self.key(key);

        let active = self.active.current();
        let bytes = if active.is_distributed() {
            match active.get(&key).await {
                Ok(Some(bytes)) => {
                    self.local.evict_expired(&key);
                    Some(bytes)
                }
                Ok(None) => self.local.lookup(&key),
                Err(err) => {
                    warn!(backend = active.name(), "Cache read failed, using local copy: {err}");
                    self.local.lookup(&key)
                }
            }
        } else {
            self.local.lookup(&key)
        };

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let (value, _) = bincode::serde::decode_from_slice(&bytes, config::standard())?;
        Ok(Some(value))
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let key = self.key(key);

        let active = self.active.current();
        if active.is_distributed() {
            active.delete(&key).await?;
        }

        self.local.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use dashmap::DashMap;
    use mailprobe_common::{Outcome, ReasonCode, Verdict};
    use pretty_assertions::assert_eq;

    use super::*;

    /// Shared store double that can be switched to fail every call.
    #[derive(Debug, Default)]
    struct FlakyStore {
        entries: DashMap<String, Vec<u8>>,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::Pool("unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn is_distributed(&self) -> bool {
            true
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.check()?;
            Ok(self.entries.get(key).map(|value| value.clone()))
        }

        async fn set(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<(), StoreError> {
            self.check()?;
            self.entries.insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.check()?;
            self.entries.remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_round_trips_outcome_locally() {
        let cache = CacheLayer::new("test");
        let outcome = Outcome::with_reason(Verdict::Invalid, ReasonCode::MailboxNotFound)
            .diagnostic("550 5.1.1 No such user");

        cache
            .set("verdict:user@example.com", &outcome, Duration::from_secs(60))
            .await
            .unwrap();

        let cached: Option<Outcome> = cache.get("verdict:user@example.com").await.unwrap();
        assert_eq!(cached, Some(outcome));
        assert!(!cache.is_distributed());
        assert_eq!(cache.local().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_value_is_a_miss() {
        tokio::time::pause();

        let cache = CacheLayer::new("test");
        cache.set("k", &7_u32, Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get::<u32>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_distributed_preferred_and_local_fallback() {
        let cache = CacheLayer::new("test");
        let shared = Arc::new(FlakyStore::default());
        cache.install(Arc::clone(&shared) as Arc<dyn CacheStore>);
        assert!(cache.is_distributed());
        assert_eq!(cache.backend_name(), "flaky");

        cache.set("k", &"shared", Duration::from_secs(60)).await.unwrap();
        assert!(shared.entries.contains_key("test:cache:k"));
        assert!(cache.local().lookup("test:cache:k").is_some());

        shared.failing.store(true, Ordering::SeqCst);
        assert_eq!(
            cache.get::<String>("k").await.unwrap().as_deref(),
            Some("shared")
        );

        cache.set("other", &1_u8, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get::<u8>("other").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_expired_local_copies_go_once_distributed() {
        tokio::time::pause();

        let cache = CacheLayer::new("test");
        cache.local().start_sweeper(Duration::from_secs(60));
        cache.install(Arc::new(FlakyStore::default()));
        assert!(!cache.local().is_sweeping());

        for i in 0..1000_u32 {
            cache.set(&format!("k{i}"), &i, Duration::from_secs(1)).await.unwrap();
        }
        assert_eq!(cache.local().len(), 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        for i in 0..1000_u32 {
            cache.get::<u32>(&format!("k{i}")).await.unwrap();
        }

        assert!(cache.local().is_empty());
    }

    #[tokio::test]
    async fn test_install_stops_sweeper() {
        let cache = CacheLayer::new("test");
        cache.local().start_sweeper(Duration::from_secs(60));
        assert!(cache.local().is_sweeping());

        cache.install(Arc::new(FlakyStore::default()));
        assert!(!cache.local().is_sweeping());
    }

    #[tokio::test]
    async fn test_delete_clears_both_layers() {
        let cache = CacheLayer::new("test");
        let shared = Arc::new(FlakyStore::default());
        cache.install(Arc::clone(&shared) as Arc<dyn CacheStore>);

        cache.set("k", &1_u64, Duration::from_secs(60)).await.unwrap();
        cache.delete("k").await.unwrap();

        assert!(shared.entries.is_empty());
        assert_eq!(cache.get::<u64>("k").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "Requires a running Redis server"]
    async fn test_redis_cache_round_trip() {
        use mailprobe_common::CoordConfig;

        use crate::store::RedisStore;

        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let config = CoordConfig {
            key_prefix: format!("mailprobe-test:cache:{}", std::process::id()),
            ..CoordConfig::default()
        };
        let store = RedisStore::connect(&url, &config).await.unwrap();

        let cache = CacheLayer::new(config.key_prefix.clone());
        cache.install(Arc::new(RedisCache::new(store)));

        cache.set("k", &vec![1_u16, 2, 3], Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get::<Vec<u16>>("k").await.unwrap(), Some(vec![1, 2, 3]));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get::<Vec<u16>>("k").await.unwrap(), None);
    }
}
