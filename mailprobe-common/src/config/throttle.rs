use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Concurrency and pacing limits applied to every connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleLimits {
    /// Connections in flight across all hosts.
    ///
    /// Default: 32
    #[serde(default = "defaults::global_max_concurrency")]
    pub global_max_concurrency: u32,

    /// Hard ceiling for a single host. The adaptive limit moves within
    /// `[1, per_host_max_concurrency]`.
    ///
    /// Default: 2
    #[serde(default = "defaults::per_host_max_concurrency")]
    pub per_host_max_concurrency: u32,

    /// Minimum spacing between two attempts to the same host.
    ///
    /// Default: 1000ms
    #[serde(default = "defaults::per_host_min_interval_ms")]
    pub per_host_min_interval_ms: u64,

    /// Longest a caller waits for a slot before giving up.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Consecutive failures that lower the adaptive limit by one.
    ///
    /// Default: 3
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes that raise the adaptive limit by one.
    ///
    /// Default: 5
    #[serde(default = "defaults::success_threshold")]
    pub success_threshold: u32,

    /// Base of the penalty window after a severe failure: the window is
    /// `min(penalty_cap_ms, penalty_base_ms * 2^failures)`.
    ///
    /// Default: 1000ms
    #[serde(default = "defaults::penalty_base_ms")]
    pub penalty_base_ms: u64,

    /// Default: 5 minutes
    #[serde(default = "defaults::penalty_cap_ms")]
    pub penalty_cap_ms: u64,
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self {
            global_max_concurrency: defaults::global_max_concurrency(),
            per_host_max_concurrency: defaults::per_host_max_concurrency(),
            per_host_min_interval_ms: defaults::per_host_min_interval_ms(),
            acquire_timeout_ms: defaults::acquire_timeout_ms(),
            failure_threshold: defaults::failure_threshold(),
            success_threshold: defaults::success_threshold(),
            penalty_base_ms: defaults::penalty_base_ms(),
            penalty_cap_ms: defaults::penalty_cap_ms(),
        }
    }
}

impl ThrottleLimits {
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        Duration::from_millis(self.per_host_min_interval_ms)
    }

    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Penalty window after `failures` consecutive failures.
    #[must_use]
    pub fn penalty_ms(&self, failures: u32) -> u64 {
        let factor = 1_u64.checked_shl(failures).unwrap_or(u64::MAX);
        self.penalty_base_ms
            .saturating_mul(factor)
            .min(self.penalty_cap_ms)
    }
}

mod defaults {
    pub const fn global_max_concurrency() -> u32 {
        32
    }

    pub const fn per_host_max_concurrency() -> u32 {
        2
    }

    pub const fn per_host_min_interval_ms() -> u64 {
        1_000
    }

    pub const fn acquire_timeout_ms() -> u64 {
        30_000
    }

    pub const fn failure_threshold() -> u32 {
        3
    }

    pub const fn success_threshold() -> u32 {
        5
    }

    pub const fn penalty_base_ms() -> u64 {
        1_000
    }

    pub const fn penalty_cap_ms() -> u64 {
        300_000
    }
}
