use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use mailprobe_common::{HostKey, ThrottleLimits};
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use super::{AcquireDecision, HostThrottleSnapshot, ThrottleStore, state::HostThrottleState};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct LocalState {
    hosts: AHashMap<HostKey, HostThrottleState>,
    global_in_flight: u32,
}

/// Throttle state held in this process.
///
/// One mutex guards every host and the global counter, so each gate check
/// and its increment happen together. Releases wake blocked acquirers.
#[derive(Debug, Default)]
pub struct LocalThrottle {
    state: Mutex<LocalState>,
    released: Notify,
}

impl LocalThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThrottleStore for LocalThrottle {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn try_acquire(
        &self,
        host: &HostKey,
        limits: &ThrottleLimits,
    ) -> Result<AcquireDecision, StoreError> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let LocalState {
            hosts,
            global_in_flight,
        } = &mut *guard;

        let host_state = hosts
            .entry(host.clone())
            .or_insert_with(|| HostThrottleState::new(limits.per_host_max_concurrency));

        let blocked = host_state.blocked(now, *global_in_flight, limits);
        if blocked.is_none() {
            host_state.acquire(now);
            *global_in_flight += 1;
        }

        let (blocked_by, retry_after) = blocked.map_or((None, Duration::ZERO), |(reason, wait)| {
            (Some(reason), wait)
        });

        Ok(AcquireDecision {
            blocked_by,
            global_in_flight: *global_in_flight,
            host_in_flight: host_state.in_flight(),
            adaptive_max: host_state.adaptive_max(),
            retry_after,
        })
    }

    async fn release(&self, host: &HostKey) -> Result<bool, StoreError> {
        let released = {
            let mut guard = self.state.lock();
            let LocalState {
                hosts,
                global_in_flight,
            } = &mut *guard;

            let released = hosts.get_mut(host).is_some_and(HostThrottleState::release);
            if released {
                *global_in_flight = global_in_flight.saturating_sub(1);
            }
            released
        };

        if released {
            self.released.notify_waiters();
        }

        Ok(released)
    }

    async fn record_success(
        &self,
        host: &HostKey,
        limits: &ThrottleLimits,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .hosts
            .entry(host.clone())
            .or_insert_with(|| HostThrottleState::new(limits.per_host_max_concurrency))
            .record_success(limits);

        Ok(())
    }

    async fn record_failure(
        &self,
        host: &HostKey,
        severe: bool,
        limits: &ThrottleLimits,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        self.state
            .lock()
            .hosts
            .entry(host.clone())
            .or_insert_with(|| HostThrottleState::new(limits.per_host_max_concurrency))
            .record_failure(severe, now, limits);

        Ok(())
    }

    async fn snapshot(&self, host: &HostKey) -> Result<Option<HostThrottleSnapshot>, StoreError> {
        let now = Instant::now();
        let guard = self.state.lock();

        Ok(guard
            .hosts
            .get(host)
            .map(|state| state.snapshot(now, guard.global_in_flight)))
    }

    fn release_signal(&self) -> Option<&Notify> {
        Some(&self.released)
    }
}
