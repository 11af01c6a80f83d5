use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{trace, warn};

use super::CacheStore;
use crate::error::StoreError;

/// Inserts between sweeps when no sweeper task is running.
const INLINE_SWEEP_EVERY: usize = 1024;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache with per-entry expiry.
///
/// Expired entries are never returned. A lookup that finds one removes it,
/// and the rest go in [`LocalCache::sweep`], run by the sweeper task or,
/// while no sweeper is running, every few inserts.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: DashMap<String, Entry>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    inserts: AtomicUsize,
}

impl LocalCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: String, value: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            self.entries.remove(&key);
            return;
        }

        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );

        let inserts = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserts % INLINE_SWEEP_EVERY == 0 && !self.is_sweeping() {
            let removed = self.sweep();
            if removed > 0 {
                trace!(removed, remaining = self.len(), "Swept local cache inline");
            }
        }
    }

    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();

        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }

        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Removes `key` if it has expired.
    pub fn evict_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drops every expired entry and returns how many went.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts the periodic sweep unless one is already running.
    ///
    /// The task only holds a weak reference and ends once the cache is gone.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, local cache sweeper not started");
            return;
        };

        let cache: Weak<Self> = Arc::downgrade(self);
        let interval = interval.max(Duration::from_secs(1));

        *sweeper = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };

                let removed = cache.sweep();
                if removed > 0 {
                    trace!(removed, remaining = cache.len(), "Swept local cache");
                }
            }
        }));
    }

    pub fn stop_sweeper(&self) {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
    }

    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[async_trait]
impl CacheStore for LocalCache {
    fn name(&self) -> &'static str {
        "local"
    }

    fn is_distributed(&self) -> bool {
        false
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.insert(key.to_string(), value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.remove(key);
        Ok(())
    }
}
