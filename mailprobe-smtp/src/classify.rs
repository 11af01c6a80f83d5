//! Keyword classification of server replies.
//!
//! Codes alone are ambiguous: a `5xx` to `RCPT TO` can mean "no such user"
//! or "you are blocked", and a `250` can come from a server that accepts
//! everything. These helpers look at the reply text to tell them apart.

use mailprobe_common::ReasonCode;

use crate::client::Response;

const CATCH_ALL_PHRASES: &[&str] = &[
    "catch-all",
    "catch all",
    "catchall",
    "accept all",
    "accepts all",
    "all recipients",
];

const BLOCKING_PHRASES: &[&str] = &[
    "blocked",
    "blacklist",
    "blocklist",
    "block list",
    "spamhaus",
    "spamcop",
    "dnsbl",
    "reputation",
    "banned",
    "abuse",
];

const GREYLIST_PHRASES: &[&str] = &[
    "greylist",
    "graylist",
    "grey-list",
    "gray-list",
    "grey list",
    "gray list",
];

const TLS_DEMANDS: &[&str] = &["must", "first", "required"];

/// The server refuses to continue until the session is encrypted.
#[must_use]
pub fn is_tls_required(response: &Response) -> bool {
    if response.code == 530 {
        return true;
    }

    if !response.is_permanent_error() && !response.is_temporary_error() {
        return false;
    }

    let text = response.lowercase_text();
    let mentions_tls = words(&text).any(|word| word == "tls" || word == "starttls");

    mentions_tls && TLS_DEMANDS.iter().any(|demand| text.contains(demand))
}

/// The reply text says every recipient is accepted.
#[must_use]
pub fn is_catch_all(response: &Response) -> bool {
    let text = response.lowercase_text();
    CATCH_ALL_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// The reply carries evidence that our address or IP is being refused on
/// reputation or policy grounds.
#[must_use]
pub fn is_blocking(response: &Response) -> bool {
    let text = response.lowercase_text();
    BLOCKING_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// Sub-tags a temporary (`4xx`) reply.
#[must_use]
pub fn temporary_reason(response: &Response) -> ReasonCode {
    let text = response.lowercase_text();
    let enhanced = response.enhanced_status().unwrap_or_default();

    let greylist_code = matches!(response.code, 450 | 451) || enhanced == "4.7.1";
    if greylist_code && GREYLIST_PHRASES.iter().any(|phrase| text.contains(phrase)) {
        return ReasonCode::Greylisted;
    }

    let rate_code = matches!(response.code, 421 | 452) || enhanced.starts_with("4.7.");
    let rate_words = text.contains("too many")
        || words(&text).any(|word| word.starts_with("rate") || word.starts_with("limit"));
    if rate_code && rate_words {
        return ReasonCode::RateLimited;
    }

    ReasonCode::TemporaryFailure
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(code: u16, text: &str) -> Response {
        Response::new(code, vec![text.to_string()])
    }

    #[test]
    fn test_tls_required() {
        assert!(is_tls_required(&reply(530, "5.7.0 Authentication required")));
        assert!(is_tls_required(&reply(
            554,
            "5.7.1 Must issue a STARTTLS command first"
        )));
        assert!(is_tls_required(&reply(451, "TLS required for this host")));
        assert!(!is_tls_required(&reply(550, "5.1.1 No such user")));
        assert!(!is_tls_required(&reply(250, "STARTTLS must be fun")));
        assert!(!is_tls_required(&reply(550, "Mailbox utilisation must be checked")));
    }

    #[test]
    fn test_catch_all_language() {
        assert!(is_catch_all(&reply(250, "2.1.5 OK, catch-all mailbox")));
        assert!(is_catch_all(&reply(250, "We accept all recipients")));
        assert!(!is_catch_all(&reply(250, "2.1.5 OK")));
    }

    #[test]
    fn test_blocking_language() {
        assert!(is_blocking(&reply(
            554,
            "5.7.1 Service unavailable; Client host blocked using zen.spamhaus.org"
        )));
        assert!(is_blocking(&reply(550, "Poor sender reputation")));
        assert!(!is_blocking(&reply(550, "5.1.1 User unknown")));
    }

    #[test]
    fn test_greylisting() {
        assert_eq!(
            temporary_reason(&reply(450, "4.2.0 Greylisted, please try again in 5 minutes")),
            ReasonCode::Greylisted
        );
        assert_eq!(
            temporary_reason(&reply(421, "4.7.1 greylisting in action")),
            ReasonCode::Greylisted
        );
    }

    #[test]
    fn test_rate_limiting() {
        assert_eq!(
            temporary_reason(&reply(421, "4.7.0 Too many connections from your IP")),
            ReasonCode::RateLimited
        );
        assert_eq!(
            temporary_reason(&reply(452, "Rate limit exceeded")),
            ReasonCode::RateLimited
        );
        assert_eq!(
            temporary_reason(&reply(450, "4.7.28 limit reached")),
            ReasonCode::RateLimited
        );
    }

    #[test]
    fn test_generic_temporary_failure() {
        assert_eq!(
            temporary_reason(&reply(450, "4.2.1 try later")),
            ReasonCode::TemporaryFailure
        );
        assert_eq!(
            temporary_reason(&reply(451, "Temporary local problem")),
            ReasonCode::TemporaryFailure
        );
    }
}
