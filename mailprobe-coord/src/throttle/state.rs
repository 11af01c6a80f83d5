//! Per-host throttle state for the process-local backend.
//!
//! Every method here runs under the local backend's mutex, so each one is a
//! single atomic step with respect to every other caller.

use std::time::Duration;

use mailprobe_common::ThrottleLimits;
use tokio::time::Instant;

use super::{BlockReason, HostThrottleSnapshot};

/// How long a caller blocked on a concurrency limit sleeps before
/// re-checking, when no release wakes it sooner.
pub(crate) const LIMIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub(crate) struct HostThrottleState {
    in_flight: u32,
    adaptive_max: u32,
    consecutive_failures: u32,
    consecutive_successes: u32,
    penalty_until: Option<Instant>,
    last_attempt: Option<Instant>,
    acquired: u64,
    successes: u64,
    failures: u64,
    severe_failures: u64,
}

impl HostThrottleState {
    pub(crate) fn new(ceiling: u32) -> Self {
        Self {
            in_flight: 0,
            adaptive_max: ceiling.max(1),
            consecutive_failures: 0,
            consecutive_successes: 0,
            penalty_until: None,
            last_attempt: None,
            acquired: 0,
            successes: 0,
            failures: 0,
            severe_failures: 0,
        }
    }

    /// Keeps the adaptive limit within `[1, ceiling]` when the configured
    /// ceiling differs between calls.
    fn clamp(&mut self, ceiling: u32) {
        self.adaptive_max = self.adaptive_max.clamp(1, ceiling.max(1));
    }

    pub(crate) const fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub(crate) const fn adaptive_max(&self) -> u32 {
        self.adaptive_max
    }

    /// The first gate that refuses a new attempt at `now`, with how long
    /// the caller should wait before asking again.
    pub(crate) fn blocked(
        &mut self,
        now: Instant,
        global_in_flight: u32,
        limits: &ThrottleLimits,
    ) -> Option<(BlockReason, Duration)> {
        self.clamp(limits.per_host_max_concurrency);

        if let Some(until) = self.penalty_until {
            if until > now {
                return Some((BlockReason::Penalty, until - now));
            }
            self.penalty_until = None;
        }

        if let Some(last) = self.last_attempt {
            let next = last + limits.min_interval();
            if next > now {
                return Some((BlockReason::MinInterval, next - now));
            }
        }

        if global_in_flight >= limits.global_max_concurrency {
            return Some((BlockReason::GlobalLimit, LIMIT_POLL));
        }

        if self.in_flight >= self.adaptive_max {
            return Some((BlockReason::HostLimit, LIMIT_POLL));
        }

        None
    }

    pub(crate) const fn acquire(&mut self, now: Instant) {
        self.in_flight += 1;
        self.last_attempt = Some(now);
        self.acquired += 1;
    }

    /// Returns `false` when nothing was held, leaving the count at zero.
    pub(crate) const fn release(&mut self) -> bool {
        if self.in_flight == 0 {
            return false;
        }

        self.in_flight -= 1;
        true
    }

    pub(crate) fn record_success(&mut self, limits: &ThrottleLimits) {
        self.clamp(limits.per_host_max_concurrency);

        self.successes += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_sub(1);
        self.consecutive_successes += 1;

        if self.consecutive_successes >= limits.success_threshold {
            self.adaptive_max = (self.adaptive_max + 1).min(limits.per_host_max_concurrency);
            self.consecutive_successes = 0;
        }
    }

    /// Returns the penalty window started by a severe failure.
    pub(crate) fn record_failure(
        &mut self,
        severe: bool,
        now: Instant,
        limits: &ThrottleLimits,
    ) -> Option<Duration> {
        self.clamp(limits.per_host_max_concurrency);

        self.failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;

        if self.consecutive_failures % limits.failure_threshold.max(1) == 0 {
            self.adaptive_max = self.adaptive_max.saturating_sub(1).max(1);
        }

        if !severe {
            return None;
        }

        self.severe_failures += 1;
        let penalty = Duration::from_millis(limits.penalty_ms(self.consecutive_failures));
        let until = now + penalty;
        if self.penalty_until.is_none_or(|current| current < until) {
            self.penalty_until = Some(until);
        }

        Some(penalty)
    }

    pub(crate) fn snapshot(&self, now: Instant, global_in_flight: u32) -> HostThrottleSnapshot {
        HostThrottleSnapshot {
            in_flight: self.in_flight,
            adaptive_max: self.adaptive_max,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            penalty_remaining: self
                .penalty_until
                .filter(|until| *until > now)
                .map(|until| until - now),
            since_last_attempt: self.last_attempt.map(|last| now.saturating_duration_since(last)),
            acquired: self.acquired,
            successes: self.successes,
            failures: self.failures,
            severe_failures: self.severe_failures,
            global_in_flight,
        }
    }
}
