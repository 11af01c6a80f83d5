//! Scriptable SMTP listener for verification tests.
//!
//! Replies are fixed per command, with optional per-recipient overrides for
//! `RCPT TO` so a catch-all probe and a real address can be told apart.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    StartTls,
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SmtpReply {
    pub code: u16,
    pub text: String,
}

impl SmtpReply {
    fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.text).into_bytes()
    }
}

#[derive(Clone)]
struct EhloReply {
    code: u16,
    lines: Vec<String>,
}

impl EhloReply {
    fn to_bytes(&self) -> Vec<u8> {
        let mut reply = String::new();
        let last = self.lines.len().saturating_sub(1);

        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            let _ = write!(&mut reply, "{}{separator}{line}\r\n", self.code);
        }

        reply.into_bytes()
    }
}

#[derive(Clone)]
struct Script {
    greeting: SmtpReply,
    ehlo: EhloReply,
    helo: SmtpReply,
    mail_from: SmtpReply,
    rcpt_to: SmtpReply,
    rcpt_overrides: HashMap<String, SmtpReply>,
    starttls: SmtpReply,
    quit: SmtpReply,
    response_delay: Option<Duration>,
    hang_on_command: Option<usize>,
    mute_after: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: SmtpReply::new(220, "mock.test ESMTP ready"),
            ehlo: EhloReply {
                code: 250,
                lines: vec!["mock.test".to_string(), "PIPELINING".to_string()],
            },
            helo: SmtpReply::new(250, "mock.test"),
            mail_from: SmtpReply::new(250, "2.1.0 OK"),
            rcpt_to: SmtpReply::new(250, "2.1.5 OK"),
            rcpt_overrides: HashMap::new(),
            starttls: SmtpReply::new(454, "4.7.0 TLS not available"),
            quit: SmtpReply::new(221, "2.0.0 Bye"),
            response_delay: None,
            hang_on_command: None,
            mute_after: None,
        }
    }
}

impl Script {
    fn rcpt_reply(&self, argument: &str) -> &SmtpReply {
        let argument = argument.to_ascii_lowercase();
        self.rcpt_overrides
            .iter()
            .find(|(recipient, _)| argument.contains(recipient.as_str()))
            .map_or(&self.rcpt_to, |(_, reply)| reply)
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// `RCPT TO` arguments in the order they arrived.
    pub async fn recipients(&self) -> Vec<String> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::RcptTo(to) => Some(to.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut received = 0;

        writer.write_all(&script.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            line.clear();

            if script.hang_on_command == Some(received) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };

            if read? == 0 {
                return Ok(());
            }
            received += 1;
            let muted = script.mute_after.is_some_and(|count| received > count);

            let command_line = line.trim();
            tracing::debug!("Mock server received: {command_line}");

            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line, ""));

            let (reply, command) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (
                    script.ehlo.to_bytes(),
                    SmtpCommand::Ehlo(argument.to_string()),
                ),
                "HELO" => (
                    script.helo.to_bytes(),
                    SmtpCommand::Helo(argument.to_string()),
                ),
                "MAIL" => (
                    script.mail_from.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    script.rcpt_reply(argument).to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "STARTTLS" => (script.starttls.to_bytes(), SmtpCommand::StartTls),
                "RSET" => (
                    SmtpReply::new(250, "2.0.0 OK").to_bytes(),
                    SmtpCommand::Rset,
                ),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    if !muted {
                        writer.write_all(&script.quit.to_bytes()).await?;
                        writer.flush().await?;
                    }
                    return Ok(());
                }
                _ => (
                    SmtpReply::new(500, "5.5.2 Command unrecognized").to_bytes(),
                    SmtpCommand::Other(command_line.to_string()),
                ),
            };

            commands.write().await.push(command);

            if muted {
                continue;
            }

            if let Some(delay) = script.response_delay {
                tokio::time::sleep(delay).await;
            }

            writer.write_all(&reply).await?;
            writer.flush().await?;
        }
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.greeting = SmtpReply::new(code, text);
        self
    }

    /// The first line is the server's greeting; the rest are extensions.
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, lines: Vec<String>) -> Self {
        self.script.ehlo = EhloReply { code, lines };
        self
    }

    #[must_use]
    pub fn with_helo_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.helo = SmtpReply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.mail_from = SmtpReply::new(code, text);
        self
    }

    /// Reply for any recipient without an override.
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.rcpt_to = SmtpReply::new(code, text);
        self
    }

    /// Reply for `RCPT TO` arguments containing `recipient` (case-insensitive).
    #[must_use]
    pub fn with_rcpt_response_for(
        mut self,
        recipient: &str,
        code: u16,
        text: impl Into<String>,
    ) -> Self {
        self.script
            .rcpt_overrides
            .insert(recipient.to_ascii_lowercase(), SmtpReply::new(code, text));
        self
    }

    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.starttls = SmtpReply::new(code, text);
        self
    }

    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.script.response_delay = Some(delay);
        self
    }

    /// Stop answering once `count` commands have been received.
    #[must_use]
    pub const fn with_hang_after_commands(mut self, count: usize) -> Self {
        self.script.hang_on_command = Some(count);
        self
    }

    /// Keep recording commands after the first `count` but never answer them.
    #[must_use]
    pub const fn with_silence_after_commands(mut self, count: usize) -> Self {
        self.script.mute_after = Some(count);
        self
    }

    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let server = MockSmtpServer {
            addr,
            commands: Arc::clone(&commands),
            connections: Arc::clone(&connections),
            shutdown: Arc::clone(&shutdown),
        };

        tokio::spawn(async move {
            while !shutdown.load(Ordering::Relaxed) {
                let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                connections.fetch_add(1, Ordering::Relaxed);
                let script = Arc::clone(&script);
                let commands = Arc::clone(&commands);

                tokio::spawn(async move {
                    if let Err(err) = MockSmtpServer::handle_client(stream, script, commands).await
                    {
                        tracing::debug!("Mock server client error: {err}");
                    }
                });
            }
        });

        Ok(server)
    }
}
