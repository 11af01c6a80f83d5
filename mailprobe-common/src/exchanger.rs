use serde::{Deserialize, Serialize};

use crate::host::HostKey;

/// A mail exchanger published for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exchanger {
    /// The hostname (or IP literal for implicit MX) of the exchanger.
    pub host: String,
    /// MX preference, lower is preferred. 0 for implicit MX.
    pub priority: u16,
}

impl Exchanger {
    #[must_use]
    pub fn new(host: impl Into<String>, priority: u16) -> Self {
        Self {
            host: host.into(),
            priority,
        }
    }

    /// The throttle key for this exchanger.
    #[must_use]
    pub fn key(&self) -> HostKey {
        HostKey::new(&self.host)
    }

    /// Returns `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self, port: u16) -> String {
        let host = self.host.trim_end_matches('.');
        if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        }
    }
}
