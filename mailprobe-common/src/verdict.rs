//! The verification vocabulary shared by the engine and the orchestrator.
//!
//! Every code path ends in an [`Outcome`]: one [`Verdict`] plus an ordered,
//! append-only list of [`ReasonCode`]s explaining how it was reached.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Final classification of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The exchanger accepted the recipient.
    Valid,
    /// The exchanger permanently rejected the recipient.
    Invalid,
    /// No conclusion could be drawn.
    Unknown,
    /// The domain accepts any local part, so acceptance carries no signal.
    CatchAll,
    /// The exchanger answered with a temporary (4xx) failure.
    TemporarilyUnavailable,
}

impl Verdict {
    /// A definitive verdict ends the exchanger sweep.
    #[must_use]
    pub const fn is_definitive(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid | Self::CatchAll)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Unknown => "unknown",
            Self::CatchAll => "catch_all",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged explanation attached to an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Accepted,
    MailboxNotFound,
    CatchAllDetected,
    CatchAllInconclusive,
    NotCatchAll,
    Greylisted,
    RateLimited,
    TemporaryFailure,
    TlsRequired,
    TlsUpgradeUnsupported,
    BannerTimeout,
    EhloTimeout,
    MailTimeout,
    RcptTimeout,
    ConnectTimeout,
    ConnectionRefused,
    NetworkUnreachable,
    ConnectionReset,
    ConnectionFailed,
    UnexpectedBanner,
    EhloRejected,
    SenderRejected,
    UnexpectedResponse,
    ProtocolError,
    Blocked,
    ThrottleTimeout,
    NoMailServers,
    DnsFailure,
    OverallTimeout,
    InvalidConfiguration,
    Exhausted,
    Cached,
}

impl ReasonCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::MailboxNotFound => "mailbox_not_found",
            Self::CatchAllDetected => "catch_all_detected",
            Self::CatchAllInconclusive => "catch_all_inconclusive",
            Self::NotCatchAll => "not_catch_all",
            Self::Greylisted => "greylisted",
            Self::RateLimited => "rate_limited",
            Self::TemporaryFailure => "temporary_failure",
            Self::TlsRequired => "tls_required",
            Self::TlsUpgradeUnsupported => "tls_upgrade_unsupported",
            Self::BannerTimeout => "banner_timeout",
            Self::EhloTimeout => "ehlo_timeout",
            Self::MailTimeout => "mail_timeout",
            Self::RcptTimeout => "rcpt_timeout",
            Self::ConnectTimeout => "connect_timeout",
            Self::ConnectionRefused => "connection_refused",
            Self::NetworkUnreachable => "network_unreachable",
            Self::ConnectionReset => "connection_reset",
            Self::ConnectionFailed => "connection_failed",
            Self::UnexpectedBanner => "unexpected_banner",
            Self::EhloRejected => "ehlo_rejected",
            Self::SenderRejected => "sender_rejected",
            Self::UnexpectedResponse => "unexpected_response",
            Self::ProtocolError => "protocol_error",
            Self::Blocked => "blocked",
            Self::ThrottleTimeout => "throttle_timeout",
            Self::NoMailServers => "no_mail_servers",
            Self::DnsFailure => "dns_failure",
            Self::OverallTimeout => "overall_timeout",
            Self::InvalidConfiguration => "invalid_configuration",
            Self::Exhausted => "exhausted",
            Self::Cached => "cached",
        }
    }

    /// Infrastructure-level failures, as opposed to mailbox-level signals.
    #[must_use]
    pub const fn is_connection_error(self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout
                | Self::ConnectionRefused
                | Self::NetworkUnreachable
                | Self::ConnectionReset
                | Self::ConnectionFailed
                | Self::BannerTimeout
                | Self::EhloTimeout
                | Self::MailTimeout
                | Self::RcptTimeout
        )
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The answer handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Ordered and append-only.
    pub reasons: Vec<ReasonCode>,
    /// Raw server text that led to the verdict, when there was one.
    pub diagnostic: Option<String>,
    /// Last failure reason per attempted exchanger.
    #[serde(default)]
    pub host_reasons: BTreeMap<String, ReasonCode>,
}

impl Outcome {
    #[must_use]
    pub const fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            reasons: Vec::new(),
            diagnostic: None,
            host_reasons: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_reason(verdict: Verdict, reason: ReasonCode) -> Self {
        let mut outcome = Self::new(verdict);
        outcome.reasons.push(reason);
        outcome
    }

    #[must_use]
    pub fn diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    pub fn push_reason(&mut self, reason: ReasonCode) {
        self.reasons.push(reason);
    }

    /// The most specific reason, i.e. the last one appended.
    #[must_use]
    pub fn primary_reason(&self) -> Option<ReasonCode> {
        self.reasons.last().copied()
    }

    #[must_use]
    pub fn has_reason(&self, reason: ReasonCode) -> bool {
        self.reasons.contains(&reason)
    }

    #[must_use]
    pub const fn is_definitive(&self) -> bool {
        self.verdict.is_definitive()
    }
}
