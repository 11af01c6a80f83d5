//! Minimal SMTP client for mailbox probing.
//!
//! Plain TCP only. The client speaks just enough SMTP to reach `RCPT TO`
//! and records a transcript of the conversation for diagnostics.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use mailprobe_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("mx.example.com:25", Duration::from_secs(10)).await?;
//! let greeting = client.read_greeting().await?;
//! assert_eq!(greeting.code, 220);
//!
//! client.command("EHLO probe.example.net").await?;
//! client.command("MAIL FROM:<>").await?;
//! let reply = client.command("RCPT TO:<someone@example.com>").await?;
//! client.quit().await?;
//!
//! for line in client.transcript() {
//!     println!("{line}");
//! }
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::{SmtpClient, TranscriptEntry};
