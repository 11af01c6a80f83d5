//! Plaintext SMTP client used for probing.

use std::{fmt, time::Duration};

use mailprobe_common::{incoming, outgoing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

const BUFFER_SIZE: usize = 4096;

/// Replies larger than this are treated as a protocol error.
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// One side of the recorded dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    Sent(String),
    Received(String),
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent(line) => write!(f, "C: {line}"),
            Self::Received(line) => write!(f, "S: {line}"),
        }
    }
}

/// An SMTP client that records every command and reply it exchanges.
///
/// The client never sends `DATA`; the probe ends at `RCPT TO` at the latest.
pub struct SmtpClient {
    stream: TcpStream,
    buffer: Vec<u8>,
    buffer_pos: usize,
    transcript: Vec<TranscriptEntry>,
}

impl SmtpClient {
    /// Opens a TCP connection to `addr`, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConnectTimeout` when the deadline passes, or
    /// the underlying IO error when the connection fails.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout(addr.to_string()))??;

        Ok(Self {
            stream,
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            transcript: Vec::new(),
        })
    }

    /// Reads the initial server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Sends a command line and reads the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.transcript
            .push(TranscriptEntry::Sent(command.to_string()));

        self.stream
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        self.stream.flush().await?;

        self.read_response().await
    }

    /// Sends `QUIT`. Callers bound this with the quit timeout and ignore
    /// failures.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    #[must_use]
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    #[must_use]
    pub fn into_transcript(self) -> Vec<TranscriptEntry> {
        self.transcript
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{response}");
                self.transcript
                    .push(TranscriptEntry::Received(response.to_string()));

                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let read = self.stream.read(&mut self.buffer[self.buffer_pos..]).await?;
            if read == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.buffer_pos += read;
        }
    }
}
