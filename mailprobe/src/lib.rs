//! The `mailprobe` command-line front end.
//!
//! Settings are read from TOML ([`settings`]), coordination starts from the
//! `[coordination]` table, and every requested address is verified
//! concurrently through one shared [`Verifier`].

pub mod report;
pub mod settings;

use futures_util::future::join_all;
use mailprobe_common::{Outcome, ValidationConfig};
use mailprobe_verify::Verifier;

pub use report::{Format, InvalidAddress, exit_status, render, split_address};
pub use settings::{CONFIG_ENV, Settings, SettingsError};

/// Verifies every address concurrently, keeping the input order.
///
/// All addresses must parse before any of them is probed.
pub async fn verify_all(
    verifier: &Verifier,
    addresses: &[String],
    config: &ValidationConfig,
) -> Result<Vec<(String, Outcome)>, InvalidAddress> {
    let parsed = addresses
        .iter()
        .map(|address| split_address(address))
        .collect::<Result<Vec<_>, _>>()?;

    let outcomes = join_all(
        parsed
            .iter()
            .map(|(address, domain)| verifier.verify(address, domain, config)),
    )
    .await;

    Ok(parsed
        .into_iter()
        .map(|(address, _)| address.to_string())
        .zip(outcomes)
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use mailprobe_common::{Exchanger, ReasonCode, Verdict};
    use mailprobe_coord::{CacheLayer, ThrottleController};
    use mailprobe_smtp::{ProbeReport, Prober};
    use mailprobe_verify::{MxResolver, ResolveError};
    use pretty_assertions::assert_eq;

    use super::*;

    struct OneExchanger;

    #[async_trait]
    impl MxResolver for OneExchanger {
        async fn resolve(&self, domain: &str) -> Result<Vec<Exchanger>, ResolveError> {
            Ok(vec![Exchanger::new(format!("mx.{domain}"), 10)])
        }
    }

    /// Accepts recipients whose local part starts with "ok".
    struct Picky;

    #[async_trait]
    impl Prober for Picky {
        async fn probe(
            &self,
            exchanger: &Exchanger,
            recipient: &str,
            _config: &ValidationConfig,
        ) -> ProbeReport {
            let mut report = ProbeReport::unreachable(&exchanger.host, ReasonCode::Accepted);
            report.outcome = if recipient.starts_with("ok") {
                Outcome::with_reason(Verdict::Valid, ReasonCode::Accepted)
            } else {
                Outcome::with_reason(Verdict::Invalid, ReasonCode::MailboxNotFound)
            };
            report
        }
    }

    fn verifier() -> Verifier {
        Verifier::new(
            Arc::new(OneExchanger),
            Arc::new(Picky),
            Arc::new(ThrottleController::local()),
            Arc::new(CacheLayer::new("test")),
        )
    }

    fn config() -> ValidationConfig {
        let mut config = ValidationConfig {
            catch_all_probe: false,
            ..ValidationConfig::default()
        };
        config.throttle.per_host_min_interval_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let addresses = vec![
            "nobody@example.com".to_string(),
            "<ok@example.org>".to_string(),
        ];

        let results = verify_all(&verifier(), &addresses, &config())
            .await
            .unwrap();

        let verdicts: Vec<_> = results
            .iter()
            .map(|(address, outcome)| (address.as_str(), outcome.verdict))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                ("nobody@example.com", Verdict::Invalid),
                ("ok@example.org", Verdict::Valid),
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_address_rejects_the_batch() {
        let addresses = vec!["ok@example.com".to_string(), "not-an-address".to_string()];

        let err = verify_all(&verifier(), &addresses, &config())
            .await
            .unwrap_err();
        assert_eq!(err, InvalidAddress("not-an-address".to_string()));
    }
}
