use std::sync::Arc;

use async_trait::async_trait;
use mailprobe_common::{
    Exchanger, Outcome, ReasonCode, ValidationConfig, Verdict, traits::FiniteStateMachine,
    tracing,
};

use super::{
    state::{HandshakeContext, HandshakeInput, HandshakeState},
    tls::{DefaultStartTlsPolicy, StartTlsPolicy},
};
use crate::{
    client::{self, Response, SmtpClient, TranscriptEntry},
    extensions::Capabilities,
};

/// Everything one conversation with one exchanger produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub host: String,
    pub outcome: Outcome,
    /// The exchanger showed evidence of blocking us.
    pub severe: bool,
    pub capabilities: Capabilities,
    pub transcript: Vec<TranscriptEntry>,
}

impl ProbeReport {
    /// A report for a probe that never exchanged a byte.
    #[must_use]
    pub fn unreachable(host: impl Into<String>, reason: ReasonCode) -> Self {
        Self {
            host: host.into(),
            outcome: Outcome::with_reason(Verdict::Unknown, reason),
            severe: false,
            capabilities: Capabilities::default(),
            transcript: Vec::new(),
        }
    }

    #[must_use]
    pub const fn verdict(&self) -> Verdict {
        self.outcome.verdict
    }

    #[must_use]
    pub fn reason(&self) -> Option<ReasonCode> {
        self.outcome.primary_reason()
    }
}

/// Runs a single verification conversation.
///
/// Implementations never retry and never fail: every problem is expressed
/// in the returned report.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        exchanger: &Exchanger,
        recipient: &str,
        config: &ValidationConfig,
    ) -> ProbeReport;
}

/// The SMTP handshake engine.
#[derive(Debug, Clone)]
pub struct HandshakeEngine {
    tls_policy: Arc<dyn StartTlsPolicy>,
}

impl Default for HandshakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_tls_policy(Arc::new(DefaultStartTlsPolicy))
    }

    #[must_use]
    pub fn with_tls_policy(tls_policy: Arc<dyn StartTlsPolicy>) -> Self {
        Self { tls_policy }
    }

    /// Connects to `exchanger` and walks the handshake up to `RCPT TO`.
    #[tracing::instrument(skip(self, config), fields(host = %exchanger.host))]
    pub async fn run(
        &self,
        exchanger: &Exchanger,
        recipient: &str,
        config: &ValidationConfig,
    ) -> ProbeReport {
        let address = exchanger.address(config.port);
        let mut client = match SmtpClient::connect(&address, config.timeouts.connect()).await {
            Ok(client) => client,
            Err(err) => {
                tracing::debug!(%address, %err, "Unable to connect");
                return ProbeReport::unreachable(&exchanger.host, err.reason_code());
            }
        };

        let mut context = HandshakeContext::new(config.tls, Arc::clone(&self.tls_policy));
        let mut state = HandshakeState::AwaitingBanner;

        let conclusion = loop {
            if let HandshakeState::Done(conclusion) = state {
                break conclusion;
            }

            let command = state.command(&config.identity, recipient);
            let deadline = state.phase_timeout(&config.timeouts);

            let input = match tokio::time::timeout(
                deadline,
                exchange(&mut client, command.as_deref()),
            )
            .await
            {
                Ok(Ok(reply)) => HandshakeInput::Reply(reply),
                Ok(Err(err)) => {
                    tracing::debug!(phase = state.phase(), %err, "Connection failed");
                    HandshakeInput::Failed(err.reason_code())
                }
                Err(_) => {
                    tracing::debug!(phase = state.phase(), ?deadline, "Phase timed out");
                    HandshakeInput::TimedOut
                }
            };

            state = state.transition(input, &mut context);
        };

        if conclusion.polite
            && tokio::time::timeout(config.timeouts.quit(), client.quit())
                .await
                .is_err()
        {
            tracing::trace!("QUIT timed out");
        }

        tracing::debug!(
            verdict = %conclusion.outcome.verdict,
            reasons = ?conclusion.outcome.reasons,
            severe = conclusion.severe,
            "Probe finished"
        );

        ProbeReport {
            host: exchanger.host.clone(),
            outcome: conclusion.outcome,
            severe: conclusion.severe,
            capabilities: context.capabilities,
            transcript: client.into_transcript(),
        }
    }
}

async fn exchange(client: &mut SmtpClient, command: Option<&str>) -> client::Result<Response> {
    match command {
        Some(command) => client.command(command).await,
        None => client.read_greeting().await,
    }
}

#[async_trait]
impl Prober for HandshakeEngine {
    async fn probe(
        &self,
        exchanger: &Exchanger,
        recipient: &str,
        config: &ValidationConfig,
    ) -> ProbeReport {
        self.run(exchanger, recipient, config).await
    }
}
