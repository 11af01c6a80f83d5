//! Soft-failure retry policy.
//!
//! Only `temporarily_unavailable` outcomes are retried, and only against the
//! same exchanger. Delays grow as `initial_delay × backoff_factor^attempt`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts per exchanger after a soft failure.
    ///
    /// Default: 2
    #[serde(default = "defaults::soft_retries")]
    pub soft_retries: u32,

    /// Delay before the first retry (in milliseconds).
    ///
    /// Default: 2000
    #[serde(default = "defaults::initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied per attempt. Must be at least 1.0.
    ///
    /// Default: 2.0
    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            soft_retries: defaults::soft_retries(),
            initial_delay_ms: defaults::initial_delay_ms(),
            backoff_factor: defaults::backoff_factor(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` retries were made.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.soft_retries
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// Saturates at [`Duration::MAX`] rather than overflowing.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.initial_delay_ms as f64 / 1000.0) * self.backoff_factor.powi(exponent);

        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

mod defaults {
    pub const fn soft_retries() -> u32 {
        2
    }

    pub const fn initial_delay_ms() -> u64 {
        2_000
    }

    pub const fn backoff_factor() -> f64 {
        2.0
    }
}
