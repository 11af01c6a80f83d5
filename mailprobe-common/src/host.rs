//! Normalized exchanger host names
//!
//! Throttle state is keyed by the exact host we connect to. DNS names are
//! case-insensitive and may carry a trailing root dot, so `MX1.Example.COM.`
//! and `mx1.example.com` must resolve to the same key.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A case-normalized exchanger host name.
///
/// Construction always lowercases ASCII, trims surrounding whitespace and
/// strips one trailing `.`; two keys compare equal exactly when they name
/// the same host.
///
/// ```
/// use mailprobe_common::HostKey;
///
/// let key = HostKey::new("MX1.Example.COM.");
/// assert_eq!(key.as_str(), "mx1.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct HostKey(Arc<str>);

impl HostKey {
    #[must_use]
    pub fn new(host: impl AsRef<str>) -> Self {
        let trimmed = host.as_ref().trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
        Self(Arc::from(trimmed.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HostKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for HostKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for HostKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for HostKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<HostKey> for String {
    fn from(key: HostKey) -> Self {
        key.0.to_string()
    }
}
