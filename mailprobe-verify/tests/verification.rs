//! End-to-end verification against a scripted SMTP listener.
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mailprobe_common::{
    Exchanger, HostKey, Outcome, ReasonCode, ThrottleLimits, ValidationConfig, Verdict,
};
use mailprobe_coord::{CacheLayer, ThrottleController};
use mailprobe_smtp::HandshakeEngine;
use mailprobe_verify::{MxResolver, ResolveError, Verifier};
use pretty_assertions::assert_eq;
use support::{MockSmtpServer, SmtpCommand};

const LOOPBACK: &str = "127.0.0.1";

/// Every domain resolves to the loopback listener.
struct Loopback;

#[async_trait]
impl MxResolver for Loopback {
    async fn resolve(&self, _domain: &str) -> Result<Vec<Exchanger>, ResolveError> {
        Ok(vec![Exchanger::new(LOOPBACK, 10)])
    }
}

fn config(server: &MockSmtpServer) -> ValidationConfig {
    config_for_port(server.port())
}

fn config_for_port(port: u16) -> ValidationConfig {
    let mut config = ValidationConfig {
        port,
        catch_all_probe: false,
        ..ValidationConfig::default()
    };
    config.identity.helo_domain = "probe.example.net".to_string();
    config.retry.initial_delay_ms = 10;
    config.throttle = ThrottleLimits {
        per_host_min_interval_ms: 0,
        ..ThrottleLimits::default()
    };
    config
}

fn verifier(throttle: &Arc<ThrottleController>) -> Verifier {
    Verifier::new(
        Arc::new(Loopback),
        Arc::new(HandshakeEngine::new()),
        Arc::clone(throttle),
        Arc::new(CacheLayer::new("test")),
    )
}

async fn verify(config: &ValidationConfig) -> Outcome {
    let throttle = Arc::new(ThrottleController::local());
    verifier(&throttle)
        .verify("user@example.com", "example.com", config)
        .await
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_accepted_recipient_is_valid() {
    let server = MockSmtpServer::builder()
        .build()
        .await
        .expect("Failed to start mock server");

    let outcome = verify(&config(&server)).await;

    assert_eq!(outcome.verdict, Verdict::Valid);
    assert_eq!(outcome.reasons, vec![ReasonCode::Accepted]);

    let commands = server.commands().await;
    assert_eq!(
        commands.first(),
        Some(&SmtpCommand::Ehlo("probe.example.net".to_string()))
    );
    assert!(commands.contains(&SmtpCommand::MailFrom("FROM:<>".to_string())));
    assert!(commands.contains(&SmtpCommand::RcptTo("TO:<user@example.com>".to_string())));
    assert!(commands.contains(&SmtpCommand::Quit));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_rejected_recipient_is_invalid() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "5.1.1 <user@example.com>: Recipient address rejected")
        .build()
        .await
        .expect("Failed to start mock server");

    let outcome = verify(&config(&server)).await;

    assert_eq!(outcome.verdict, Verdict::Invalid);
    assert_eq!(outcome.reasons, vec![ReasonCode::MailboxNotFound]);
    assert!(
        outcome
            .diagnostic
            .as_deref()
            .is_some_and(|text| text.contains("5.1.1"))
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_greylisting_retries_then_gives_up() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(450, "4.2.0 Greylisted, please try again later")
        .build()
        .await
        .expect("Failed to start mock server");

    let config = config(&server);
    let outcome = verify(&config).await;

    assert_eq!(outcome.verdict, Verdict::TemporarilyUnavailable);
    assert_eq!(
        outcome.reasons,
        vec![ReasonCode::Greylisted, ReasonCode::Exhausted]
    );
    assert_eq!(
        outcome.host_reasons.get(LOOPBACK),
        Some(&ReasonCode::Greylisted)
    );
    assert_eq!(server.recipients().await.len(), 3);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_catch_all_domain() {
    let server = MockSmtpServer::builder()
        .build()
        .await
        .expect("Failed to start mock server");

    let config = ValidationConfig {
        catch_all_probe: true,
        ..config(&server)
    };
    let outcome = verify(&config).await;

    assert_eq!(outcome.verdict, Verdict::CatchAll);
    assert_eq!(outcome.reasons, vec![ReasonCode::CatchAllDetected]);

    let recipients = server.recipients().await;
    assert_eq!(recipients.len(), 1);
    assert!(!recipients[0].contains("user@example.com"));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_not_catch_all_domain() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "5.1.1 No such user")
        .with_rcpt_response_for("user@example.com", 250, "2.1.5 OK")
        .build()
        .await
        .expect("Failed to start mock server");

    let config = ValidationConfig {
        catch_all_probe: true,
        ..config(&server)
    };
    let outcome = verify(&config).await;

    assert_eq!(outcome.verdict, Verdict::Valid);
    assert_eq!(
        outcome.reasons,
        vec![ReasonCode::NotCatchAll, ReasonCode::Accepted]
    );
    assert_eq!(server.recipients().await.len(), 2);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_required_tls_without_starttls() {
    let server = MockSmtpServer::builder()
        .build()
        .await
        .expect("Failed to start mock server");

    let mut config = config(&server);
    config.tls.required = true;
    let outcome = verify(&config).await;

    assert_eq!(outcome.verdict, Verdict::Unknown);
    assert_eq!(
        outcome.reasons,
        vec![ReasonCode::TlsRequired, ReasonCode::Exhausted]
    );
    assert!(
        !server
            .commands()
            .await
            .iter()
            .any(|command| matches!(command, SmtpCommand::MailFrom(_)))
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_blocking_reply_penalises_host() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(
            554,
            "5.7.1 Service unavailable; client host blocked using Spamhaus",
        )
        .build()
        .await
        .expect("Failed to start mock server");

    let throttle = Arc::new(ThrottleController::local());
    let outcome = verifier(&throttle)
        .verify("user@example.com", "example.com", &config(&server))
        .await;

    assert_eq!(outcome.verdict, Verdict::Unknown);
    assert_eq!(outcome.reasons, vec![ReasonCode::Blocked, ReasonCode::Exhausted]);

    let snapshot = throttle
        .snapshot(&HostKey::new(LOOPBACK))
        .await
        .unwrap()
        .expect("host state after a probe");
    assert_eq!(snapshot.severe_failures, 1);
    assert_eq!(snapshot.in_flight, 0);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_silent_server_times_out() {
    let server = MockSmtpServer::builder()
        .with_hang_after_commands(0)
        .build()
        .await
        .expect("Failed to start mock server");

    let mut config = config(&server);
    config.timeouts.ehlo_ms = 200;
    let outcome = verify(&config).await;

    assert_eq!(outcome.verdict, Verdict::Unknown);
    assert_eq!(
        outcome.reasons,
        vec![ReasonCode::EhloTimeout, ReasonCode::Exhausted]
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_phase_timeout_skips_quit() {
    let server = MockSmtpServer::builder()
        .with_silence_after_commands(2)
        .build()
        .await
        .expect("Failed to start mock server");

    let mut config = config(&server);
    config.timeouts.rcpt_ms = 200;
    let outcome = verify(&config).await;

    assert_eq!(outcome.verdict, Verdict::Unknown);
    assert_eq!(
        outcome.reasons,
        vec![ReasonCode::RcptTimeout, ReasonCode::Exhausted]
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    let commands = server.commands().await;
    assert!(commands.contains(&SmtpCommand::RcptTo("TO:<user@example.com>".to_string())));
    assert!(!commands.contains(&SmtpCommand::Quit));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_closed_port_is_connection_refused() {
    let port = {
        let listener = tokio::net::TcpListener::bind((LOOPBACK, 0))
            .await
            .expect("Failed to reserve a port");
        listener.local_addr().expect("Listener address").port()
    };

    let outcome = verify(&config_for_port(port)).await;

    assert_eq!(outcome.verdict, Verdict::Unknown);
    assert_eq!(
        outcome.reasons,
        vec![ReasonCode::ConnectionRefused, ReasonCode::Exhausted]
    );
    assert_eq!(
        outcome.host_reasons.get(LOOPBACK),
        Some(&ReasonCode::ConnectionRefused)
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Network operations not supported in MIRI")]
async fn test_concurrent_verifications_share_one_host_limit() {
    let server = MockSmtpServer::builder()
        .with_response_delay(Duration::from_millis(20))
        .build()
        .await
        .expect("Failed to start mock server");

    let mut config = config(&server);
    config.throttle.per_host_max_concurrency = 1;
    let throttle = Arc::new(ThrottleController::local());
    let verifier = Arc::new(verifier(&throttle));

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let verifier = Arc::clone(&verifier);
            let config = config.clone();
            tokio::spawn(async move {
                verifier
                    .verify(&format!("user{i}@example.com"), "example.com", &config)
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().verdict, Verdict::Valid);
    }

    assert_eq!(server.connections(), 4);
    let snapshot = throttle
        .snapshot(&HostKey::new(LOOPBACK))
        .await
        .unwrap()
        .expect("host state after probes");
    assert_eq!(snapshot.acquired, 4);
    assert_eq!(snapshot.in_flight, 0);
}
