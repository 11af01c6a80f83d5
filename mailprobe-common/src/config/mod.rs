//! Verification configuration.
//!
//! A [`ValidationConfig`] is immutable for the duration of one verification.
//! Everything deserializes from TOML with defaults for omitted fields, and
//! [`ValidationConfig::validate`] must pass before any connection is made.

mod coord;
mod retry;
mod throttle;
mod timeouts;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use self::{
    coord::CoordConfig, retry::RetryPolicy, throttle::ThrottleLimits, timeouts::TimeoutConfig,
};
use crate::error::ConfigError;

/// Who we claim to be during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Sent with `EHLO`/`HELO`.
    ///
    /// Default: `localhost`
    #[serde(default = "defaults::helo_domain")]
    pub helo_domain: String,

    /// Sent with `MAIL FROM`. Empty uses the null sender `<>`.
    #[serde(default)]
    pub mail_from: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            helo_domain: defaults::helo_domain(),
            mail_from: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsPolicy {
    /// Refuse to probe exchangers that do not advertise `STARTTLS`.
    #[serde(default)]
    pub required: bool,

    /// With `required`, continue in plaintext when `STARTTLS` is offered.
    ///
    /// Default: true
    #[serde(default = "defaults::allow_downgrade")]
    pub allow_downgrade: bool,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            required: false,
            allow_downgrade: defaults::allow_downgrade(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub identity: Identity,

    #[serde(default)]
    pub tls: TlsPolicy,

    #[serde(default)]
    pub throttle: ThrottleLimits,

    /// Exchangers tried per verification, after ordering.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_exchangers")]
    pub max_exchangers: usize,

    /// Shuffle exchangers that share a priority.
    ///
    /// Default: true
    #[serde(default = "defaults::randomize_same_priority")]
    pub randomize_same_priority: bool,

    /// Probe a random local part before the real address.
    ///
    /// Default: true
    #[serde(default = "defaults::catch_all_probe")]
    pub catch_all_probe: bool,

    /// Default: 25
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// When set, definitive outcomes are cached for this long.
    #[serde(default)]
    pub result_cache_ttl_secs: Option<u64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            identity: Identity::default(),
            tls: TlsPolicy::default(),
            throttle: ThrottleLimits::default(),
            max_exchangers: defaults::max_exchangers(),
            randomize_same_priority: defaults::randomize_same_priority(),
            catch_all_probe: defaults::catch_all_probe(),
            port: defaults::port(),
            result_cache_ttl_secs: None,
        }
    }
}

impl ValidationConfig {
    /// Checks the configuration before it is used for any probe.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; any error means the configuration
    /// must not be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let overall_ms = self.timeouts.overall_ms;
        if overall_ms == 0 {
            return Err(ConfigError::NonPositiveTimeout { phase: "overall" });
        }

        for (phase, phase_ms) in self.timeouts.phases() {
            if phase_ms == 0 {
                return Err(ConfigError::NonPositiveTimeout { phase });
            }

            if phase_ms > overall_ms {
                return Err(ConfigError::PhaseExceedsOverall {
                    phase,
                    phase_ms,
                    overall_ms,
                });
            }
        }

        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidBackoff(self.retry.backoff_factor));
        }

        let throttle = &self.throttle;
        if throttle.acquire_timeout_ms == 0 {
            return Err(ConfigError::NonPositiveTimeout {
                phase: "throttle acquire",
            });
        }

        for (name, value) in [
            ("global_max_concurrency", throttle.global_max_concurrency),
            ("per_host_max_concurrency", throttle.per_host_max_concurrency),
            ("failure_threshold", throttle.failure_threshold),
            ("success_threshold", throttle.success_threshold),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }

        if self.max_exchangers == 0 {
            return Err(ConfigError::ZeroLimit("max_exchangers"));
        }

        if throttle.penalty_cap_ms < throttle.penalty_base_ms {
            return Err(ConfigError::InvalidField {
                field: "penalty_cap_ms",
                reason: format!(
                    "must not be below penalty_base_ms ({})",
                    throttle.penalty_base_ms
                ),
            });
        }

        if self.identity.helo_domain.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "helo_domain",
                reason: "must not be empty".to_string(),
            });
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidField {
                field: "port",
                reason: "must not be zero".to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn result_cache_ttl(&self) -> Option<Duration> {
        self.result_cache_ttl_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

mod defaults {
    pub fn helo_domain() -> String {
        "localhost".to_string()
    }

    pub const fn allow_downgrade() -> bool {
        true
    }

    pub const fn max_exchangers() -> usize {
        3
    }

    pub const fn randomize_same_priority() -> bool {
        true
    }

    pub const fn catch_all_probe() -> bool {
        true
    }

    pub const fn port() -> u16 {
        25
    }
}
