//! Rendering outcomes for the terminal.

use std::{collections::BTreeMap, fmt::Write};

use clap::ValueEnum;
use mailprobe_common::{Outcome, ReasonCode, Verdict};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Toml,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Not an email address: {0}")]
pub struct InvalidAddress(pub String);

/// Splits `local@domain`, tolerating surrounding angle brackets.
///
/// The domain is everything after the last `@`.
pub fn split_address(address: &str) -> Result<(&str, &str), InvalidAddress> {
    let trimmed = address.trim();
    let bare = trimmed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(trimmed);

    match bare.rsplit_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains(|c: char| c.is_whitespace() || c == '@') =>
        {
            Ok((bare, domain))
        }
        _ => Err(InvalidAddress(address.to_string())),
    }
}

/// Process exit status for a verdict; a batch exits with the highest.
#[must_use]
pub const fn exit_status(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Valid => 0,
        Verdict::Invalid => 1,
        Verdict::CatchAll => 2,
        Verdict::TemporarilyUnavailable => 3,
        Verdict::Unknown => 4,
    }
}

#[derive(Serialize)]
struct Entry<'a> {
    address: &'a str,
    verdict: Verdict,
    reasons: &'a [ReasonCode],
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    host_reasons: &'a BTreeMap<String, ReasonCode>,
}

#[derive(Serialize)]
struct Entries<'a> {
    result: Vec<Entry<'a>>,
}

pub fn render(results: &[(String, Outcome)], format: Format) -> Result<String, toml::ser::Error> {
    match format {
        Format::Text => Ok(render_text(results)),
        Format::Toml => toml::to_string(&Entries {
            result: results
                .iter()
                .map(|(address, outcome)| Entry {
                    address,
                    verdict: outcome.verdict,
                    reasons: &outcome.reasons,
                    diagnostic: outcome.diagnostic.as_deref(),
                    host_reasons: &outcome.host_reasons,
                })
                .collect(),
        }),
    }
}

fn render_text(results: &[(String, Outcome)]) -> String {
    let mut out = String::new();

    for (address, outcome) in results {
        let reasons = outcome
            .reasons
            .iter()
            .map(|reason| reason.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let _ = writeln!(out, "{address}: {}", outcome.verdict);
        let _ = writeln!(out, "  reasons: {reasons}");

        if let Some(diagnostic) = &outcome.diagnostic {
            let _ = writeln!(out, "  diagnostic: {diagnostic}");
        }

        for (host, reason) in &outcome.host_reasons {
            let _ = writeln!(out, "  {host}: {reason}");
        }
    }

    out
}
