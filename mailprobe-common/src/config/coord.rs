use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the shared coordination store.
///
/// Without a `redis_url` everything stays process-local. With one, the
/// process starts local anyway and upgrades once the store answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordConfig {
    /// e.g. `redis://127.0.0.1:6379/0`
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prepended to every key written to the shared store.
    ///
    /// Default: `mailprobe`
    #[serde(default = "defaults::key_prefix")]
    pub key_prefix: String,

    /// Delay between connection attempts while the store is unreachable.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Default: 16
    #[serde(default = "defaults::pool_max_size")]
    pub pool_max_size: usize,

    /// Default: 5 seconds
    #[serde(default = "defaults::connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Expiry of per-host throttle state, refreshed on every write.
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "defaults::state_ttl_secs")]
    pub state_ttl_secs: u64,

    /// How often the local cache drops expired entries.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: defaults::key_prefix(),
            reconnect_interval_secs: defaults::reconnect_interval_secs(),
            pool_max_size: defaults::pool_max_size(),
            connect_timeout_secs: defaults::connect_timeout_secs(),
            state_ttl_secs: defaults::state_ttl_secs(),
            sweep_interval_secs: defaults::sweep_interval_secs(),
        }
    }
}

impl CoordConfig {
    #[must_use]
    pub const fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

mod defaults {
    pub fn key_prefix() -> String {
        "mailprobe".to_string()
    }

    pub const fn reconnect_interval_secs() -> u64 {
        30
    }

    pub const fn pool_max_size() -> usize {
        16
    }

    pub const fn connect_timeout_secs() -> u64 {
        5
    }

    pub const fn state_ttl_secs() -> u64 {
        86_400
    }

    pub const fn sweep_interval_secs() -> u64 {
        60
    }
}
