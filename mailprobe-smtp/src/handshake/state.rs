//! The probe state machine.
//!
//! Each state names the reply we are waiting for. Entering a state (other
//! than the banner and `Done`) means sending its command; the engine reads
//! the reply and feeds it back through [`FiniteStateMachine::transition`].

use std::{sync::Arc, time::Duration};

use mailprobe_common::{
    Identity, Outcome, ReasonCode, TimeoutConfig, TlsPolicy, Verdict,
    traits::FiniteStateMachine,
};

use super::tls::{StartTlsDecision, StartTlsPolicy};
use crate::{classify, client::Response, extensions::Capabilities};

/// How a probe ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conclusion {
    pub outcome: Outcome,
    /// The server showed evidence of blocking us.
    pub severe: bool,
    /// The socket is healthy and `QUIT` should be sent before closing.
    pub polite: bool,
}

impl Conclusion {
    fn answered(verdict: Verdict, reasons: &[ReasonCode]) -> Self {
        let mut outcome = Outcome::new(verdict);
        reasons.iter().for_each(|reason| outcome.push_reason(*reason));

        Self {
            outcome,
            severe: false,
            polite: true,
        }
    }

    fn teardown(reason: ReasonCode) -> Self {
        Self {
            outcome: Outcome::with_reason(Verdict::Unknown, reason),
            severe: false,
            polite: false,
        }
    }

    fn severe(mut self) -> Self {
        self.severe = true;
        self
    }

    fn impolite(mut self) -> Self {
        self.polite = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingBanner,
    /// `helo_fallback` is set once EHLO was rejected and HELO sent instead.
    AwaitingEhlo {
        helo_fallback: bool,
    },
    AwaitingTlsAck,
    AwaitingMailAck,
    AwaitingRcptAck,
    Done(Conclusion),
}

/// What the engine observed while waiting in a state.
#[derive(Debug)]
pub enum HandshakeInput {
    Reply(Response),
    /// The phase timeout expired.
    TimedOut,
    /// The connection failed.
    Failed(ReasonCode),
}

#[derive(Debug)]
pub struct HandshakeContext {
    pub tls: TlsPolicy,
    pub policy: Arc<dyn StartTlsPolicy>,
    pub capabilities: Capabilities,
    pub last_reply: Option<Response>,
}

impl HandshakeContext {
    #[must_use]
    pub fn new(tls: TlsPolicy, policy: Arc<dyn StartTlsPolicy>) -> Self {
        Self {
            tls,
            policy,
            capabilities: Capabilities::default(),
            last_reply: None,
        }
    }
}

impl HandshakeState {
    /// The command that leads into this state, if any.
    #[must_use]
    pub fn command(&self, identity: &Identity, recipient: &str) -> Option<String> {
        match self {
            Self::AwaitingEhlo {
                helo_fallback: false,
            } => Some(format!("EHLO {}", identity.helo_domain)),
            Self::AwaitingEhlo {
                helo_fallback: true,
            } => Some(format!("HELO {}", identity.helo_domain)),
            Self::AwaitingTlsAck => Some("STARTTLS".to_string()),
            Self::AwaitingMailAck => Some(format!("MAIL FROM:<{}>", identity.mail_from)),
            Self::AwaitingRcptAck => Some(format!("RCPT TO:<{recipient}>")),
            Self::AwaitingBanner | Self::Done(_) => None,
        }
    }

    /// How long to wait for the reply in this state.
    #[must_use]
    pub const fn phase_timeout(&self, timeouts: &TimeoutConfig) -> Duration {
        match self {
            Self::AwaitingBanner => timeouts.banner(),
            Self::AwaitingEhlo { .. } | Self::AwaitingTlsAck => timeouts.ehlo(),
            Self::AwaitingMailAck => timeouts.mail(),
            Self::AwaitingRcptAck => timeouts.rcpt(),
            Self::Done(_) => timeouts.quit(),
        }
    }

    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::AwaitingBanner => "banner",
            Self::AwaitingEhlo { .. } => "ehlo",
            Self::AwaitingTlsAck => "starttls",
            Self::AwaitingMailAck => "mail",
            Self::AwaitingRcptAck => "rcpt",
            Self::Done(_) => "done",
        }
    }

    const fn timeout_reason(&self) -> ReasonCode {
        match self {
            Self::AwaitingBanner => ReasonCode::BannerTimeout,
            Self::AwaitingMailAck => ReasonCode::MailTimeout,
            Self::AwaitingRcptAck | Self::Done(_) => ReasonCode::RcptTimeout,
            Self::AwaitingEhlo { .. } | Self::AwaitingTlsAck => ReasonCode::EhloTimeout,
        }
    }

    fn on_banner(reply: &Response) -> Self {
        if reply.code == 220 {
            return Self::AwaitingEhlo {
                helo_fallback: false,
            };
        }

        let conclusion = Conclusion::answered(Verdict::Unknown, &[ReasonCode::UnexpectedBanner]);
        if matches!(reply.code, 421 | 554) && classify::is_blocking(reply) {
            let mut conclusion = conclusion.severe();
            conclusion.outcome.push_reason(ReasonCode::Blocked);
            return Self::Done(conclusion);
        }

        Self::Done(conclusion)
    }

    fn on_ehlo(reply: &Response, helo_fallback: bool, context: &mut HandshakeContext) -> Self {
        if reply.is_success() {
            if !helo_fallback {
                context.capabilities = Capabilities::from_ehlo(reply);
            }

            if context.tls.required && !context.capabilities.supports_starttls() {
                return Self::Done(Conclusion::answered(
                    Verdict::Unknown,
                    &[ReasonCode::TlsRequired],
                ));
            }

            return match context.policy.decide(&context.capabilities, context.tls) {
                StartTlsDecision::Continue => Self::AwaitingMailAck,
                StartTlsDecision::Upgrade => Self::AwaitingTlsAck,
                StartTlsDecision::Abort(reason) => {
                    Self::Done(Conclusion::answered(Verdict::Unknown, &[reason]))
                }
            };
        }

        if classify::is_tls_required(reply) {
            return Self::Done(Conclusion::answered(
                Verdict::Unknown,
                &[ReasonCode::TlsRequired],
            ));
        }

        if reply.is_temporary_error() {
            return Self::Done(Conclusion::answered(
                Verdict::TemporarilyUnavailable,
                &[classify::temporary_reason(reply)],
            ));
        }

        if reply.is_permanent_error() {
            if classify::is_blocking(reply) {
                return Self::Done(
                    Conclusion::answered(
                        Verdict::Unknown,
                        &[ReasonCode::EhloRejected, ReasonCode::Blocked],
                    )
                    .severe(),
                );
            }

            if !helo_fallback {
                return Self::AwaitingEhlo {
                    helo_fallback: true,
                };
            }

            return Self::Done(Conclusion::answered(
                Verdict::Unknown,
                &[ReasonCode::EhloRejected],
            ));
        }

        Self::Done(Conclusion::answered(
            Verdict::Unknown,
            &[ReasonCode::UnexpectedResponse],
        ))
    }

    fn on_tls_ack(reply: &Response, context: &HandshakeContext) -> Self {
        if reply.code == 220 {
            // The server now expects a TLS handshake, so QUIT would be garbage.
            return Self::Done(
                Conclusion::answered(Verdict::Unknown, &[ReasonCode::TlsUpgradeUnsupported])
                    .impolite(),
            );
        }

        if context.tls.required && !context.tls.allow_downgrade {
            return Self::Done(Conclusion::answered(
                Verdict::Unknown,
                &[ReasonCode::TlsRequired],
            ));
        }

        Self::AwaitingMailAck
    }

    fn on_mail(reply: &Response) -> Self {
        if reply.is_success() {
            return Self::AwaitingRcptAck;
        }

        if classify::is_tls_required(reply) {
            return Self::Done(Conclusion::answered(
                Verdict::Unknown,
                &[ReasonCode::TlsRequired],
            ));
        }

        if reply.is_temporary_error() {
            return Self::Done(Conclusion::answered(
                Verdict::TemporarilyUnavailable,
                &[classify::temporary_reason(reply)],
            ));
        }

        if reply.is_permanent_error() {
            if classify::is_blocking(reply) {
                return Self::Done(
                    Conclusion::answered(
                        Verdict::Unknown,
                        &[ReasonCode::SenderRejected, ReasonCode::Blocked],
                    )
                    .severe(),
                );
            }

            return Self::Done(Conclusion::answered(
                Verdict::Unknown,
                &[ReasonCode::SenderRejected],
            ));
        }

        Self::Done(Conclusion::answered(
            Verdict::Unknown,
            &[ReasonCode::UnexpectedResponse],
        ))
    }

    fn on_rcpt(reply: &Response) -> Self {
        let conclusion = if reply.is_success() {
            if classify::is_catch_all(reply) {
                Conclusion::answered(Verdict::CatchAll, &[ReasonCode::CatchAllDetected])
            } else {
                Conclusion::answered(Verdict::Valid, &[ReasonCode::Accepted])
            }
        } else if classify::is_tls_required(reply) {
            Conclusion::answered(Verdict::Unknown, &[ReasonCode::TlsRequired])
        } else if reply.is_temporary_error() {
            Conclusion::answered(
                Verdict::TemporarilyUnavailable,
                &[classify::temporary_reason(reply)],
            )
        } else if reply.is_permanent_error() {
            if classify::is_blocking(reply) {
                Conclusion::answered(Verdict::Unknown, &[ReasonCode::Blocked]).severe()
            } else {
                Conclusion::answered(Verdict::Invalid, &[ReasonCode::MailboxNotFound])
            }
        } else {
            Conclusion::answered(Verdict::Unknown, &[ReasonCode::UnexpectedResponse])
        };

        Self::Done(conclusion)
    }
}

impl FiniteStateMachine for HandshakeState {
    type Input = HandshakeInput;
    type Context = HandshakeContext;

    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self {
        if matches!(self, Self::Done(_)) {
            return self;
        }

        let next = match input {
            HandshakeInput::TimedOut => Self::Done(Conclusion::teardown(self.timeout_reason())),
            HandshakeInput::Failed(reason) => Self::Done(Conclusion::teardown(reason)),
            HandshakeInput::Reply(reply) => {
                let next = match self {
                    Self::AwaitingBanner => Self::on_banner(&reply),
                    Self::AwaitingEhlo { helo_fallback } => {
                        Self::on_ehlo(&reply, helo_fallback, context)
                    }
                    Self::AwaitingTlsAck => Self::on_tls_ack(&reply, context),
                    Self::AwaitingMailAck => Self::on_mail(&reply),
                    Self::AwaitingRcptAck => Self::on_rcpt(&reply),
                    done @ Self::Done(_) => return done,
                };
                context.last_reply = Some(reply);
                next
            }
        };

        match next {
            Self::Done(mut conclusion) => {
                conclusion.outcome.diagnostic =
                    context.last_reply.as_ref().map(ToString::to_string);
                Self::Done(conclusion)
            }
            other => other,
        }
    }
}
