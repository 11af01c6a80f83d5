//! One TCP conversation with one exchanger for one candidate address.
//!
//! The [`HandshakeEngine`] owns the socket and the phase timeouts; the
//! decisions live in the pure [`HandshakeState`] machine.

mod engine;
mod state;
mod tls;

pub use engine::{HandshakeEngine, ProbeReport, Prober};
pub use state::{Conclusion, HandshakeContext, HandshakeInput, HandshakeState};
pub use tls::{DefaultStartTlsPolicy, StartTlsDecision, StartTlsPolicy};
