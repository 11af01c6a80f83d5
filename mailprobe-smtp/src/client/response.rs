//! SMTP reply parsing.
//!
//! Replies are `<code><sep><text>` lines, where a `-` separator marks a
//! continuation and a space (or nothing) marks the final line.

use std::fmt;

use super::error::{ClientError, Result};

/// One line of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for continuation lines.
    pub is_last: bool,
    pub message: String,
}

/// A complete, possibly multi-line, reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined by a single space.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// The reply text, lowercased for keyword matching.
    #[must_use]
    pub fn lowercase_text(&self) -> String {
        self.text().to_ascii_lowercase()
    }

    /// The RFC 3463 enhanced status code leading the first line, if present.
    ///
    /// ```
    /// use mailprobe_smtp::client::Response;
    ///
    /// let reply = Response::new(550, vec!["5.1.1 No such user".to_string()]);
    /// assert_eq!(reply.enhanced_status(), Some("5.1.1"));
    /// ```
    #[must_use]
    pub fn enhanced_status(&self) -> Option<&str> {
        let first = self.lines.first()?.split_whitespace().next()?;
        let mut parts = first.split('.');
        let valid = matches!(parts.next(), Some("2" | "4" | "5"))
            && parts
                .by_ref()
                .take(2)
                .filter(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
                .count()
                == 2
            && parts.next().is_none();

        valid.then_some(first)
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parses a single reply line, without its line terminator.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u16>().ok())
            .ok_or_else(|| ClientError::ParseError(format!("Invalid status code in '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(&other) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(other)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` when
    /// more data is needed. Bytes that are not valid UTF-8 are replaced
    /// rather than rejected, since some exchangers send Latin-1 text.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the reply is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut first_code = None;
        let mut lines = Vec::new();

        for raw in buffer.split_inclusive(|&b| b == b'\n') {
            if !raw.ends_with(b"\n") {
                return Ok(None);
            }

            consumed += raw.len();
            let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(&String::from_utf8_lossy(raw))?;
            match first_code {
                Some(code) if code != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.text())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_single_line() {
        assert_eq!(
            Response::parse_line("220 mail.example.com ESMTP").unwrap(),
            ResponseLine {
                code: 220,
                is_last: true,
                message: "mail.example.com ESMTP".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_continuation_line() {
        let line = Response::parse_line("250-PIPELINING").unwrap();
        assert!(!line.is_last);
        assert_eq!(line.message, "PIPELINING");
    }

    #[test]
    fn test_parse_bare_code() {
        let line = Response::parse_line("250").unwrap();
        assert!(line.is_last);
        assert!(line.message.is_empty());
    }

    #[test]
    fn test_parse_invalid_lines() {
        assert!(Response::parse_line("OK").is_err());
        assert!(Response::parse_line("2x0 OK").is_err());
        assert!(Response::parse_line("250+OK").is_err());
    }

    #[test]
    fn test_parse_multi_line_response() {
        let data = b"250-mail.example.com\r\n250-STARTTLS\r\n250 SIZE 10000000\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();

        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "STARTTLS", "SIZE 10000000"]
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_parse_leaves_trailing_data() {
        let data = b"250 OK\r\n221 Bye\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();

        assert_eq!(response.code, 250);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_parse_incomplete_response() {
        assert!(Response::parse_response(b"250-mail.example.com\r\n250-SIZE")
            .unwrap()
            .is_none());
        assert!(Response::parse_response(b"").unwrap().is_none());
    }

    #[test]
    fn test_parse_code_mismatch() {
        assert!(Response::parse_response(b"250-first\r\n251 second\r\n").is_err());
    }

    #[test]
    fn test_bare_lf_terminators() {
        let (response, _) = Response::parse_response(b"220 relaxed.example\n")
            .unwrap()
            .unwrap();
        assert_eq!(response.to_string(), "220 relaxed.example");
    }

    #[test]
    fn test_enhanced_status() {
        let reply = Response::new(450, vec!["4.2.1 try later".to_string()]);
        assert_eq!(reply.enhanced_status(), Some("4.2.1"));

        let plain = Response::new(250, vec!["OK".to_string()]);
        assert_eq!(plain.enhanced_status(), None);

        let version = Response::new(220, vec!["1.2.3 banner".to_string()]);
        assert_eq!(version.enhanced_status(), None);
    }

    #[test]
    fn test_display_is_diagnostic() {
        let reply = Response::new(550, vec!["5.1.1 No such user".to_string()]);
        assert_eq!(reply.to_string(), "550 5.1.1 No such user");
    }
}
