//! Error types for the SMTP probe client.

use std::io;

use mailprobe_common::ReasonCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The TCP connection could not be established in time.
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    /// Failed to parse an SMTP reply from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,
}

impl ClientError {
    /// The reason tag reported when this error ends a probe.
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Io(err) => reason_for_io(err),
            Self::ConnectTimeout(_) => ReasonCode::ConnectTimeout,
            Self::ConnectionClosed => ReasonCode::ConnectionReset,
            Self::ParseError(_) => ReasonCode::ProtocolError,
        }
    }
}

fn reason_for_io(err: &io::Error) -> ReasonCode {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ReasonCode::ConnectionRefused,
        io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable => {
            ReasonCode::NetworkUnreachable
        }
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ReasonCode::ConnectionReset,
        io::ErrorKind::TimedOut => ReasonCode::ConnectTimeout,
        _ => ReasonCode::ConnectionFailed,
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
