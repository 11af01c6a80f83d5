//! Test support for end-to-end verification against a local SMTP listener.

pub mod mock_server;

pub use mock_server::{MockSmtpServer, SmtpCommand};
