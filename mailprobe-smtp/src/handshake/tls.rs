//! STARTTLS decision hook.
//!
//! Probes run in plaintext. When an exchanger advertises `STARTTLS` the
//! engine asks a [`StartTlsPolicy`] whether to carry on without it, give up,
//! or upgrade. Upgrading the session is not implemented by the engine; a
//! policy returning [`StartTlsDecision::Upgrade`] gets the `STARTTLS`
//! command sent and the probe ends with `tls_upgrade_unsupported` once the
//! server agrees.

use std::fmt::Debug;

use mailprobe_common::{ReasonCode, TlsPolicy, tracing};

use crate::extensions::Capabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTlsDecision {
    /// Proceed to `MAIL FROM` in plaintext.
    Continue,
    /// Send `STARTTLS`.
    Upgrade,
    /// End the probe with `unknown` and this reason.
    Abort(ReasonCode),
}

pub trait StartTlsPolicy: Debug + Send + Sync {
    /// Called once, after a successful EHLO (or HELO) reply.
    fn decide(&self, capabilities: &Capabilities, tls: TlsPolicy) -> StartTlsDecision;
}

/// Plaintext unless TLS is required and downgrading is forbidden.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStartTlsPolicy;

impl StartTlsPolicy for DefaultStartTlsPolicy {
    fn decide(&self, capabilities: &Capabilities, tls: TlsPolicy) -> StartTlsDecision {
        match (capabilities.supports_starttls(), tls.required) {
            (_, false) => StartTlsDecision::Continue,
            (false, true) => StartTlsDecision::Abort(ReasonCode::TlsRequired),
            (true, true) if tls.allow_downgrade => {
                tracing::warn!("STARTTLS is required but unsupported here, continuing in plaintext");
                StartTlsDecision::Continue
            }
            (true, true) => StartTlsDecision::Abort(ReasonCode::TlsUpgradeUnsupported),
        }
    }
}
