//! Adaptive per-host throttling.
//!
//! Every connection attempt goes through [`ThrottleController::acquire`],
//! which only hands out a [`ThrottlePermit`] once all four gates pass in a
//! single atomic step on the active backend:
//!
//! 1. the host is not serving a penalty window,
//! 2. the minimum interval since the last attempt to the host has elapsed,
//! 3. the global in-flight count is below the global ceiling,
//! 4. the host's in-flight count is below its adaptive limit.
//!
//! The adaptive limit starts at `per_host_max_concurrency`, drops by one
//! every `failure_threshold` consecutive failures (never below 1) and climbs
//! back by one every `success_threshold` consecutive successes.

mod local;
mod redis;
mod state;

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use mailprobe_common::{HostKey, ThrottleLimits};
use serde::Serialize;
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, warn};

pub use self::{local::LocalThrottle, redis::RedisThrottle};
use crate::{
    error::{StoreError, ThrottleError},
    switch::BackendSwitch,
};

/// Pause before retrying after the backend itself failed.
const STORE_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// The gate that refused an acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Penalty,
    MinInterval,
    GlobalLimit,
    HostLimit,
}

impl BlockReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Penalty => "penalty",
            Self::MinInterval => "min_interval",
            Self::GlobalLimit => "global_limit",
            Self::HostLimit => "host_limit",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "penalty" => Some(Self::Penalty),
            "min_interval" => Some(Self::MinInterval),
            "global_limit" => Some(Self::GlobalLimit),
            "host_limit" => Some(Self::HostLimit),
            _ => None,
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one atomic acquire attempt.
///
/// When `blocked_by` is `None` the slot was taken and both counters already
/// include it. Otherwise nothing changed and `retry_after` suggests how long
/// to wait before asking again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquireDecision {
    pub blocked_by: Option<BlockReason>,
    pub global_in_flight: u32,
    pub host_in_flight: u32,
    pub adaptive_max: u32,
    pub retry_after: Duration,
}

impl AcquireDecision {
    #[must_use]
    pub const fn acquired(&self) -> bool {
        self.blocked_by.is_none()
    }
}

/// Point-in-time view of one host's throttle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostThrottleSnapshot {
    pub in_flight: u32,
    pub adaptive_max: u32,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub penalty_remaining: Option<Duration>,
    pub since_last_attempt: Option<Duration>,
    pub acquired: u64,
    pub successes: u64,
    pub failures: u64,
    pub severe_failures: u64,
    pub global_in_flight: u32,
}

/// A place throttle state lives. Every method is one atomic step against
/// that state.
#[async_trait]
pub trait ThrottleStore: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_acquire(
        &self,
        host: &HostKey,
        limits: &ThrottleLimits,
    ) -> Result<AcquireDecision, StoreError>;

    /// Returns `false` if the host held no slot; counters stay at zero.
    async fn release(&self, host: &HostKey) -> Result<bool, StoreError>;

    async fn record_success(
        &self,
        host: &HostKey,
        limits: &ThrottleLimits,
    ) -> Result<(), StoreError>;

    async fn record_failure(
        &self,
        host: &HostKey,
        severe: bool,
        limits: &ThrottleLimits,
    ) -> Result<(), StoreError>;

    /// `None` for a host with no recorded state.
    async fn snapshot(&self, host: &HostKey) -> Result<Option<HostThrottleSnapshot>, StoreError>;

    /// Signalled on every release, for backends that can observe them.
    /// Without one, blocked acquirers poll.
    fn release_signal(&self) -> Option<&Notify> {
        None
    }
}

/// Entry point for throttling. Resolves the active backend on every call,
/// so a backend installed at runtime takes effect immediately.
#[derive(Debug)]
pub struct ThrottleController {
    backend: BackendSwitch<dyn ThrottleStore>,
}

impl Default for ThrottleController {
    fn default() -> Self {
        Self::local()
    }
}

impl ThrottleController {
    #[must_use]
    pub fn new(backend: Arc<dyn ThrottleStore>) -> Self {
        Self {
            backend: BackendSwitch::new(backend),
        }
    }

    #[must_use]
    pub fn local() -> Self {
        Self::new(Arc::new(LocalThrottle::new()))
    }

    /// Makes `backend` active for every subsequent call. Permits already
    /// handed out still release against the backend that granted them.
    pub fn install(&self, backend: Arc<dyn ThrottleStore>) {
        let previous = self.backend.replace(backend);
        debug!(
            "Throttle backend switched from {} to {}",
            previous.name(),
            self.backend_name()
        );
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.current().name()
    }

    /// Waits for a slot on `host`.
    ///
    /// # Errors
    ///
    /// [`ThrottleError::AcquireTimeout`] once `acquire_timeout_ms` passes
    /// without a slot. Backend errors are retried until then.
    #[tracing::instrument(skip_all, fields(host = %host))]
    pub async fn acquire(
        &self,
        host: &HostKey,
        limits: &ThrottleLimits,
    ) -> Result<ThrottlePermit, ThrottleError> {
        let started = Instant::now();
        let deadline = started + limits.acquire_timeout();
        let mut blocked_by = None;

        loop {
            let backend = self.backend.current();

            // Registered before the attempt so a release in between still wakes us.
            let released = backend.release_signal().map(Notify::notified);
            tokio::pin!(released);
            if let Some(notified) = released.as_mut().as_pin_mut() {
                notified.enable();
            }

            let wait = match backend.try_acquire(host, limits).await {
                Ok(decision) if decision.acquired() => {
                    debug!(
                        global = decision.global_in_flight,
                        in_flight = decision.host_in_flight,
                        max = decision.adaptive_max,
                        "Acquired throttle slot"
                    );
                    return Ok(ThrottlePermit::new(
                        host.clone(),
                        Arc::clone(&backend),
                        decision,
                    ));
                }
                Ok(decision) => {
                    blocked_by = decision.blocked_by;
                    decision.retry_after
                }
                Err(err) => {
                    warn!(backend = backend.name(), "Throttle acquire failed: {err}");
                    STORE_ERROR_BACKOFF
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(ThrottleError::AcquireTimeout {
                    host: host.clone(),
                    waited: now - started,
                    blocked_by,
                });
            }

            let wait = wait.clamp(Duration::from_millis(1), deadline - now);
            match released.as_mut().as_pin_mut() {
                Some(notified) => {
                    let _ = tokio::time::timeout(wait, notified).await;
                }
                None => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Releases a slot on `host` directly. Prefer [`ThrottlePermit::release`].
    pub async fn release(&self, host: &HostKey) -> Result<bool, ThrottleError> {
        Ok(self.backend.current().release(host).await?)
    }

    pub async fn record_success(
        &self,
        host: &HostKey,
        limits: &ThrottleLimits,
    ) -> Result<(), ThrottleError> {
        Ok(self.backend.current().record_success(host, limits).await?)
    }

    pub async fn record_failure(
        &self,
        host: &HostKey,
        severe: bool,
        limits: &ThrottleLimits,
    ) -> Result<(), ThrottleError> {
        let backend = self.backend.current();
        backend.record_failure(host, severe, limits).await?;

        if severe {
            warn!(host = %host, backend = backend.name(), "Severe failure, host penalised");
        }

        Ok(())
    }

    pub async fn snapshot(
        &self,
        host: &HostKey,
    ) -> Result<Option<HostThrottleSnapshot>, ThrottleError> {
        Ok(self.backend.current().snapshot(host).await?)
    }
}

/// A held slot on one host.
///
/// Release it with [`ThrottlePermit::release`]; a permit dropped without
/// that releases itself on a spawned task.
#[derive(Debug)]
#[must_use = "dropping a permit releases its slot"]
pub struct ThrottlePermit {
    host: HostKey,
    backend: Option<Arc<dyn ThrottleStore>>,
    decision: AcquireDecision,
}

impl ThrottlePermit {
    fn new(host: HostKey, backend: Arc<dyn ThrottleStore>, decision: AcquireDecision) -> Self {
        Self {
            host,
            backend: Some(backend),
            decision,
        }
    }

    #[must_use]
    pub const fn host(&self) -> &HostKey {
        &self.host
    }

    /// The counters as they stood when this slot was granted.
    #[must_use]
    pub const fn decision(&self) -> &AcquireDecision {
        &self.decision
    }

    pub async fn release(mut self) {
        if let Some(backend) = self.backend.take() {
            release_on(&*backend, &self.host).await;
        }
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };

        let host = self.host.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_on(&*backend, &host).await;
                });
            }
            Err(_) => warn!(host = %host, "Throttle permit dropped outside a runtime, slot leaked"),
        }
    }
}

async fn release_on(backend: &dyn ThrottleStore, host: &HostKey) {
    match backend.release(host).await {
        Ok(true) => {}
        Ok(false) => warn!(host = %host, "Released a throttle slot that was not held"),
        Err(err) => warn!(host = %host, backend = backend.name(), "Throttle release failed: {err}"),
    }
}
