//! Catch-all detection.
//!
//! A domain whose exchangers accept a mailbox that cannot exist will accept
//! anything, so a positive RCPT says nothing about the real address.

use mailprobe_common::Verdict;
use rand::Rng;
use serde::Serialize;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the random part of a probe local part.
pub const RANDOM_LEN: usize = 24;

/// Starts every probe local part with a letter, whatever the random part.
pub const PROBE_PREFIX: &str = "mp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchAllStatus {
    CatchAll,
    NotCatchAll,
    /// No exchanger gave a definitive answer. Never read as "not catch-all".
    Inconclusive,
}

impl CatchAllStatus {
    /// What a single probe verdict says, if anything.
    #[must_use]
    pub const fn from_verdict(verdict: Verdict) -> Option<Self> {
        match verdict {
            Verdict::Valid | Verdict::CatchAll => Some(Self::CatchAll),
            Verdict::Invalid => Some(Self::NotCatchAll),
            Verdict::Unknown | Verdict::TemporarilyUnavailable => None,
        }
    }
}

/// A lowercase alphanumeric local part nobody would register.
pub fn random_local_part<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut local = String::with_capacity(PROBE_PREFIX.len() + RANDOM_LEN);
    local.push_str(PROBE_PREFIX);
    local.extend((0..RANDOM_LEN).map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())])));
    local
}

/// `<random local part>@<domain>`
pub fn probe_address<R: Rng + ?Sized>(domain: &str, rng: &mut R) -> String {
    format!("{}@{domain}", random_local_part(rng))
}
