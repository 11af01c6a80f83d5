//! Error types for the mailprobe-common crate.

use thiserror::Error;

/// A configuration that must not be used for a verification.
///
/// Raised by [`crate::ValidationConfig::validate`]; callers fail closed on
/// any of these rather than probing with nonsensical limits.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A timeout was zero.
    #[error("Timeout for {phase} must be positive")]
    NonPositiveTimeout { phase: &'static str },

    /// A phase timeout is longer than the whole verification may take.
    #[error("Timeout for {phase} ({phase_ms}ms) exceeds the overall timeout ({overall_ms}ms)")]
    PhaseExceedsOverall {
        phase: &'static str,
        phase_ms: u64,
        overall_ms: u64,
    },

    /// Backoff factors below one would shrink the delay between retries.
    #[error("Backoff factor must be at least 1.0, got {0}")]
    InvalidBackoff(f64),

    /// A concurrency ceiling or count that must allow at least one.
    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),

    /// Any other field with an unusable value.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
