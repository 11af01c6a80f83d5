//! SMTP probing for mailprobe.
//!
//! [`client`] is a small plaintext SMTP client; [`handshake`] drives it
//! through banner, EHLO, MAIL FROM and RCPT TO and turns the replies into an
//! [`Outcome`](mailprobe_common::Outcome). No message is ever sent.

pub mod classify;
pub mod client;
pub mod extensions;
pub mod handshake;

pub use extensions::{Capabilities, Extension};
pub use handshake::{
    DefaultStartTlsPolicy, HandshakeEngine, ProbeReport, Prober, StartTlsDecision, StartTlsPolicy,
};
