//! Drives a verification across a domain's exchangers.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use mailprobe_common::{
    Exchanger, HostKey, Outcome, ReasonCode, ValidationConfig, Verdict, internal,
};
use mailprobe_coord::{CacheLayer, Coordinator, ThrottleController, ThrottleError};
use mailprobe_smtp::{HandshakeEngine, ProbeReport, Prober};
use tracing::{debug, info, warn};

use crate::{
    catch_all::{self, CatchAllStatus},
    error::ResolveError,
    ordering::order_exchangers,
    resolver::{CachedResolver, DnsResolver, MxResolver},
};

const DNS_TIMEOUT: Duration = Duration::from_secs(5);
const MX_CACHE_TTL: Duration = Duration::from_secs(300);
const MX_NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Verifies mailboxes.
///
/// Every probe goes through the shared [`ThrottleController`], so any number
/// of concurrent [`Verifier::verify`] calls respect the same per-host and
/// global limits.
pub struct Verifier {
    resolver: Arc<dyn MxResolver>,
    prober: Arc<dyn Prober>,
    throttle: Arc<ThrottleController>,
    cache: Arc<CacheLayer>,
}

impl Verifier {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn MxResolver>,
        prober: Arc<dyn Prober>,
        throttle: Arc<ThrottleController>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        Self {
            resolver,
            prober,
            throttle,
            cache,
        }
    }

    /// System DNS behind the coordinator's cache, and the SMTP handshake
    /// engine.
    pub fn with_coordinator(coordinator: &Coordinator) -> Result<Self, ResolveError> {
        let resolver = CachedResolver::new(
            DnsResolver::new(DNS_TIMEOUT)?,
            coordinator.cache(),
            MX_CACHE_TTL,
            MX_NEGATIVE_CACHE_TTL,
        );

        Ok(Self::new(
            Arc::new(resolver),
            Arc::new(HandshakeEngine::new()),
            coordinator.throttle(),
            coordinator.cache(),
        ))
    }

    /// Decides whether `address` at `domain` is deliverable.
    ///
    /// Never fails: invalid configuration, DNS trouble and timeouts all
    /// become an [`Outcome`].
    #[tracing::instrument(skip(self, config))]
    pub async fn verify(&self, address: &str, domain: &str, config: &ValidationConfig) -> Outcome {
        if let Err(err) = config.validate() {
            warn!("Refusing to verify with an invalid configuration: {err}");
            return Outcome::with_reason(Verdict::Unknown, ReasonCode::InvalidConfiguration)
                .diagnostic(err.to_string());
        }

        let Ok(outcome) =
            tokio::time::timeout(config.timeouts.overall(), self.cached(address, domain, config))
                .await
        else {
            warn!(
                "Verification did not finish within {:?}",
                config.timeouts.overall()
            );
            return Outcome::with_reason(Verdict::Unknown, ReasonCode::OverallTimeout);
        };

        info!(verdict = %outcome.verdict, reasons = ?outcome.reasons, "Verification finished");
        outcome
    }

    async fn cached(&self, address: &str, domain: &str, config: &ValidationConfig) -> Outcome {
        let Some(ttl) = config.result_cache_ttl() else {
            return self.sweep(address, domain, config).await;
        };

        let key = format!(
            "verdict:{}:{}",
            domain.trim_end_matches('.').to_ascii_lowercase(),
            address
        );

        match self.cache.get::<Outcome>(&key).await {
            Ok(Some(mut outcome)) => {
                debug!("Verdict cache hit");
                outcome.push_reason(ReasonCode::Cached);
                return outcome;
            }
            Ok(None) => {}
            Err(err) => warn!("Ignoring unreadable verdict cache entry: {err}"),
        }

        let outcome = self.sweep(address, domain, config).await;
        if outcome.is_definitive()
            && let Err(err) = self.cache.set(&key, &outcome, ttl).await
        {
            warn!("Unable to cache verdict: {err}");
        }

        outcome
    }

    async fn sweep(&self, address: &str, domain: &str, config: &ValidationConfig) -> Outcome {
        let exchangers = match self.resolver.resolve(domain).await {
            Ok(exchangers) if exchangers.is_empty() => {
                debug!("{domain} has no mail exchangers");
                return Outcome::with_reason(Verdict::Invalid, ReasonCode::NoMailServers);
            }
            Ok(exchangers) => exchangers,
            Err(err) => {
                warn!("Unable to resolve exchangers for {domain}: {err}");
                return Outcome::with_reason(Verdict::Unknown, ReasonCode::DnsFailure)
                    .diagnostic(err.to_string());
            }
        };

        let candidates = {
            let mut rng = rand::rng();
            order_exchangers(
                exchangers,
                config.max_exchangers,
                config.randomize_same_priority,
                &mut rng,
            )
        };
        debug!(
            candidates = ?candidates.iter().map(|mx| mx.host.as_str()).collect::<Vec<_>>(),
            "Ordered exchangers"
        );

        let mut sweep = Sweep::default();

        if config.catch_all_probe {
            let probe = {
                let mut rng = rand::rng();
                catch_all::probe_address(domain, &mut rng)
            };

            match self.detect_catch_all(&candidates, &probe, config).await {
                (CatchAllStatus::CatchAll, diagnostic) => {
                    internal!(level = INFO, "{domain} accepts any recipient");
                    let mut outcome =
                        Outcome::with_reason(Verdict::CatchAll, ReasonCode::CatchAllDetected);
                    outcome.diagnostic = diagnostic;
                    return outcome;
                }
                (CatchAllStatus::NotCatchAll, _) => sweep.reasons.push(ReasonCode::NotCatchAll),
                (CatchAllStatus::Inconclusive, _) => {
                    sweep.reasons.push(ReasonCode::CatchAllInconclusive);
                }
            }
        }

        for exchanger in &candidates {
            if let Some(outcome) = self.try_exchanger(exchanger, address, config, &mut sweep).await
            {
                return outcome;
            }
        }

        sweep.exhausted()
    }

    /// Runs the probe address against successive candidates until one of
    /// them answers definitively.
    async fn detect_catch_all(
        &self,
        candidates: &[Exchanger],
        probe: &str,
        config: &ValidationConfig,
    ) -> (CatchAllStatus, Option<String>) {
        for exchanger in candidates {
            let Ok(report) = self.guarded_probe(exchanger, probe, config).await else {
                continue;
            };

            if let Some(status) = CatchAllStatus::from_verdict(report.verdict()) {
                debug!(host = %exchanger.host, ?status, "Catch-all probe answered");
                return (status, report.outcome.diagnostic);
            }
        }

        (CatchAllStatus::Inconclusive, None)
    }

    /// Probes one exchanger, retrying soft failures. `Some` is a definitive
    /// outcome.
    async fn try_exchanger(
        &self,
        exchanger: &Exchanger,
        address: &str,
        config: &ValidationConfig,
        sweep: &mut Sweep,
    ) -> Option<Outcome> {
        let mut attempt = 0;

        loop {
            let report = match self.guarded_probe(exchanger, address, config).await {
                Ok(report) => report,
                Err(reason) => {
                    sweep.record(&exchanger.host, Verdict::Unknown, reason, None);
                    return None;
                }
            };

            if report.outcome.is_definitive() {
                return Some(std::mem::take(sweep).conclude(report.outcome));
            }

            let verdict = report.verdict();
            let reason = report.reason().unwrap_or(ReasonCode::UnexpectedResponse);
            sweep.record(&exchanger.host, verdict, reason, report.outcome.diagnostic);

            if verdict != Verdict::TemporarilyUnavailable || !config.retry.should_retry(attempt) {
                return None;
            }

            let delay = config.retry.delay_for(attempt);
            internal!(
                level = DEBUG,
                "{reason} from {}, retrying in {delay:?}",
                exchanger.host
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// A single probe inside a throttle slot. `Err` means no slot was
    /// granted and nothing was sent.
    async fn guarded_probe(
        &self,
        exchanger: &Exchanger,
        recipient: &str,
        config: &ValidationConfig,
    ) -> Result<ProbeReport, ReasonCode> {
        let host = exchanger.key();

        let permit = match self.throttle.acquire(&host, &config.throttle).await {
            Ok(permit) => permit,
            Err(err) => {
                warn!(host = %host, "No throttle slot: {err}");
                return Err(ReasonCode::ThrottleTimeout);
            }
        };

        let report = self.prober.probe(exchanger, recipient, config).await;

        if let Err(err) = self.record(&host, &report, config).await {
            warn!(host = %host, "Unable to record probe result: {err}");
        }

        permit.release().await;
        Ok(report)
    }

    async fn record(
        &self,
        host: &HostKey,
        report: &ProbeReport,
        config: &ValidationConfig,
    ) -> Result<(), ThrottleError> {
        let limits = &config.throttle;

        if report.severe {
            return self.throttle.record_failure(host, true, limits).await;
        }

        match report.verdict() {
            verdict if verdict.is_definitive() => self.throttle.record_success(host, limits).await,
            Verdict::TemporarilyUnavailable => {
                self.throttle.record_failure(host, false, limits).await
            }
            _ if report.reason().is_some_and(ReasonCode::is_connection_error) => {
                self.throttle.record_failure(host, false, limits).await
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("throttle", &self.throttle.backend_name())
            .field("cache", &self.cache.backend_name())
            .finish_non_exhaustive()
    }
}

/// What has been learned so far across exchangers.
#[derive(Debug, Default)]
struct Sweep {
    reasons: Vec<ReasonCode>,
    host_reasons: BTreeMap<String, ReasonCode>,
    diagnostic: Option<String>,
    last: Option<ReasonCode>,
    soft: Option<(ReasonCode, Option<String>)>,
}

impl Sweep {
    fn record(
        &mut self,
        host: &str,
        verdict: Verdict,
        reason: ReasonCode,
        diagnostic: Option<String>,
    ) {
        self.host_reasons.insert(host.to_string(), reason);
        if verdict == Verdict::TemporarilyUnavailable {
            self.soft = Some((reason, diagnostic.clone()));
        }
        if diagnostic.is_some() {
            self.diagnostic = diagnostic;
        }
        self.last = Some(reason);
    }

    fn conclude(self, outcome: Outcome) -> Outcome {
        let mut reasons = self.reasons;
        reasons.extend(outcome.reasons);

        Outcome {
            reasons,
            host_reasons: self.host_reasons,
            ..outcome
        }
    }

    /// No exchanger answered definitively. If any exchanger ended on a soft
    /// failure the whole sweep is `temporarily_unavailable`, whatever order
    /// the exchangers were tried in.
    fn exhausted(self) -> Outcome {
        let mut reasons = self.reasons;
        let (verdict, diagnostic) = match (self.soft, self.last) {
            (Some((reason, diagnostic)), _) => {
                reasons.push(reason);
                (
                    Verdict::TemporarilyUnavailable,
                    diagnostic.or(self.diagnostic),
                )
            }
            (None, Some(reason)) => {
                reasons.push(reason);
                (Verdict::Unknown, self.diagnostic)
            }
            (None, None) => (Verdict::Unknown, self.diagnostic),
        };
        reasons.push(ReasonCode::Exhausted);

        Outcome {
            verdict,
            reasons,
            diagnostic,
            host_reasons: self.host_reasons,
        }
    }
}
