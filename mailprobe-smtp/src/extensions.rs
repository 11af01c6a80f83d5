//! Capabilities advertised in an EHLO reply.

use core::fmt::{self, Display};

use serde::Serialize;

use crate::client::Response;

/// A single advertised extension.
///
/// Only the extensions that influence probing are modelled; everything
/// else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    /// RFC 3207
    Starttls,
    /// RFC 1870, with the advertised maximum (0 when unlimited or absent).
    Size(usize),
    /// RFC 2920
    Pipelining,
    /// RFC 6531
    SmtpUtf8,
    Other(String),
}

impl Extension {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let keyword = words.next()?.to_ascii_uppercase();

        Some(match keyword.as_str() {
            "STARTTLS" => Self::Starttls,
            "SIZE" => Self::Size(
                words
                    .next()
                    .and_then(|size| size.parse().ok())
                    .unwrap_or_default(),
            ),
            "PIPELINING" => Self::Pipelining,
            "SMTPUTF8" => Self::SmtpUtf8,
            _ => Self::Other(line.trim().to_string()),
        })
    }
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starttls => fmt.write_str("STARTTLS"),
            Self::Size(0) => fmt.write_str("SIZE"),
            Self::Size(max) => write!(fmt, "SIZE {max}"),
            Self::Pipelining => fmt.write_str("PIPELINING"),
            Self::SmtpUtf8 => fmt.write_str("SMTPUTF8"),
            Self::Other(raw) => fmt.write_str(raw),
        }
    }
}

/// The capability set of one exchanger, in advertised order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities(Vec<Extension>);

impl Capabilities {
    /// Parses a successful EHLO reply. The first line is the server's
    /// greeting and carries no capability.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        Self(
            response
                .lines
                .iter()
                .skip(1)
                .filter_map(|line| Extension::parse(line))
                .collect(),
        )
    }

    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.0.contains(&Extension::Starttls)
    }

    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.0.iter().find_map(|ext| match ext {
            Extension::Size(size) => Some(*size),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
