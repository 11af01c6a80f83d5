//! Per-phase timeouts for a single probe.
//!
//! Every suspension point of a handshake has its own bound, and the whole
//! verification is bounded again by `overall_ms`. Probing is latency
//! sensitive, so the defaults are far shorter than the RFC 5321 server
//! recommendations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for establishing the TCP connection.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::connect_ms")]
    pub connect_ms: u64,

    /// Timeout for the `220` greeting.
    ///
    /// Default: 15 seconds
    #[serde(default = "defaults::banner_ms")]
    pub banner_ms: u64,

    /// Timeout for the EHLO (or HELO) reply.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::ehlo_ms")]
    pub ehlo_ms: u64,

    /// Timeout for the MAIL FROM reply.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::mail_ms")]
    pub mail_ms: u64,

    /// Timeout for the RCPT TO reply.
    ///
    /// Default: 15 seconds
    #[serde(default = "defaults::rcpt_ms")]
    pub rcpt_ms: u64,

    /// Timeout for the QUIT reply. Errors here never change a verdict.
    ///
    /// Default: 2 seconds
    #[serde(default = "defaults::quit_ms")]
    pub quit_ms: u64,

    /// Bound on the entire verification, including throttling and retries.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::overall_ms")]
    pub overall_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: defaults::connect_ms(),
            banner_ms: defaults::banner_ms(),
            ehlo_ms: defaults::ehlo_ms(),
            mail_ms: defaults::mail_ms(),
            rcpt_ms: defaults::rcpt_ms(),
            quit_ms: defaults::quit_ms(),
            overall_ms: defaults::overall_ms(),
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    #[must_use]
    pub const fn banner(&self) -> Duration {
        Duration::from_millis(self.banner_ms)
    }

    #[must_use]
    pub const fn ehlo(&self) -> Duration {
        Duration::from_millis(self.ehlo_ms)
    }

    #[must_use]
    pub const fn mail(&self) -> Duration {
        Duration::from_millis(self.mail_ms)
    }

    #[must_use]
    pub const fn rcpt(&self) -> Duration {
        Duration::from_millis(self.rcpt_ms)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_millis(self.quit_ms)
    }

    #[must_use]
    pub const fn overall(&self) -> Duration {
        Duration::from_millis(self.overall_ms)
    }

    /// The phase timeouts, named, in handshake order.
    pub(crate) const fn phases(&self) -> [(&'static str, u64); 6] {
        [
            ("connect", self.connect_ms),
            ("banner", self.banner_ms),
            ("ehlo", self.ehlo_ms),
            ("mail", self.mail_ms),
            ("rcpt", self.rcpt_ms),
            ("quit", self.quit_ms),
        ]
    }
}

mod defaults {
    pub const fn connect_ms() -> u64 {
        10_000
    }

    pub const fn banner_ms() -> u64 {
        15_000
    }

    pub const fn ehlo_ms() -> u64 {
        10_000
    }

    pub const fn mail_ms() -> u64 {
        10_000
    }

    pub const fn rcpt_ms() -> u64 {
        15_000
    }

    pub const fn quit_ms() -> u64 {
        2_000
    }

    pub const fn overall_ms() -> u64 {
        120_000
    }
}
