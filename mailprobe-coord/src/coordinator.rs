//! Owns the throttle and cache and upgrades them to Redis when it answers.

use std::{sync::Arc, time::Duration};

use mailprobe_common::CoordConfig;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    cache::{CacheLayer, RedisCache},
    error::StoreError,
    store::RedisStore,
    throttle::{RedisThrottle, ThrottleController},
};

/// Shortest pause between reconnect attempts.
const MIN_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Entry point for coordination.
///
/// Always starts process-local. With a `redis_url` configured, a background
/// task keeps trying to reach Redis and swaps both the throttle and the
/// cache over the moment it does. Callers holding the [`ThrottleController`]
/// or [`CacheLayer`] pick the new backend up on their next call.
#[derive(Debug)]
pub struct Coordinator {
    throttle: Arc<ThrottleController>,
    cache: Arc<CacheLayer>,
    watcher: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// A coordinator that never leaves the local backends.
    #[must_use]
    pub fn local(config: &CoordConfig) -> Self {
        let cache = Arc::new(CacheLayer::new(config.key_prefix.clone()));
        cache.local().start_sweeper(config.sweep_interval());

        Self {
            throttle: Arc::new(ThrottleController::local()),
            cache,
            watcher: None,
        }
    }

    /// Starts local and, if `redis_url` is set, spawns the connection watcher.
    ///
    /// Must be called from within a tokio runtime for the watcher and the
    /// cache sweeper to run.
    #[must_use]
    pub fn start(config: &CoordConfig) -> Self {
        let mut coordinator = Self::local(config);

        let Some(url) = config.redis_url.clone() else {
            return coordinator;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                coordinator.watcher = Some(handle.spawn(watch(
                    url,
                    config.clone(),
                    Arc::clone(&coordinator.throttle),
                    Arc::clone(&coordinator.cache),
                )));
            }
            Err(_) => warn!("No async runtime, staying on local coordination"),
        }

        coordinator
    }

    #[must_use]
    pub fn throttle(&self) -> Arc<ThrottleController> {
        Arc::clone(&self.throttle)
    }

    #[must_use]
    pub fn cache(&self) -> Arc<CacheLayer> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.cache.is_distributed()
    }

    /// Whether the watcher is still trying to reach Redis.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.watcher
            .as_ref()
            .is_some_and(|watcher| !watcher.is_finished())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

async fn watch(
    url: String,
    config: CoordConfig,
    throttle: Arc<ThrottleController>,
    cache: Arc<CacheLayer>,
) {
    let interval = config.reconnect_interval().max(MIN_RECONNECT_INTERVAL);

    loop {
        match RedisStore::connect(&url, &config).await {
            Ok(store) => {
                throttle.install(Arc::new(RedisThrottle::new(store.clone(), &config)));
                cache.install(Arc::new(RedisCache::new(store)));
                info!("Connected to Redis, coordination is now distributed");
                return;
            }
            Err(StoreError::InvalidUrl(err)) => {
                error!("Invalid Redis URL, staying on local coordination: {err}");
                return;
            }
            Err(err) => {
                warn!(retry_in = ?interval, "Redis unavailable, staying local: {err}");
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_redis_stays_local() {
        let coordinator = Coordinator::start(&CoordConfig::default());

        assert!(!coordinator.is_distributed());
        assert!(!coordinator.is_connecting());
        assert_eq!(coordinator.throttle().backend_name(), "local");
        assert!(coordinator.cache().local().is_sweeping());
    }

    #[tokio::test]
    async fn test_invalid_url_stops_watcher() {
        let coordinator = Coordinator::start(&CoordConfig {
            redis_url: Some("definitely not a url".into()),
            ..CoordConfig::default()
        });

        for _ in 0..100 {
            if !coordinator.is_connecting() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!coordinator.is_connecting());
        assert!(!coordinator.is_distributed());
    }

    #[tokio::test]
    async fn test_unreachable_redis_keeps_retrying_locally() {
        tokio::time::pause();

        let coordinator = Coordinator::start(&CoordConfig {
            redis_url: Some("redis://127.0.0.1:1/".into()),
            connect_timeout_secs: 1,
            reconnect_interval_secs: 5,
            ..CoordConfig::default()
        });

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(coordinator.is_connecting());
        assert_eq!(coordinator.throttle().backend_name(), "local");
    }

    #[tokio::test]
    #[ignore = "Requires a running Redis server"]
    async fn test_upgrades_to_redis_at_runtime() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let coordinator = Coordinator::start(&CoordConfig {
            redis_url: Some(url),
            key_prefix: format!("mailprobe-test:coordinator:{}", std::process::id()),
            ..CoordConfig::default()
        });
        let throttle = coordinator.throttle();

        for _ in 0..200 {
            if coordinator.is_distributed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert!(coordinator.is_distributed());
        assert_eq!(throttle.backend_name(), "redis");
        assert!(!coordinator.cache().local().is_sweeping());
    }
}
