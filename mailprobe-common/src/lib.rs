//! Shared building blocks for the mailprobe crates.
//!
//! Everything the handshake engine, the coordination layer and the
//! orchestrator need to agree on lives here: exchanger and host types, the
//! verdict vocabulary, configuration, and logging setup.

pub mod config;
pub mod error;
pub mod exchanger;
pub mod host;
pub mod logging;
pub mod traits;
pub mod verdict;

pub use config::{
    CoordConfig, Identity, RetryPolicy, ThrottleLimits, TimeoutConfig, TlsPolicy,
    ValidationConfig,
};
pub use error::ConfigError;
pub use exchanger::Exchanger;
pub use host::HostKey;
pub use tracing;
pub use verdict::{Outcome, ReasonCode, Verdict};
