//! Proxy fallback policy.

use serde::{Deserialize, Serialize};

/// Whether client handles may route through a fallback proxy when the
/// primary API endpoint is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyPolicy {
    /// Connect to the primary endpoint only.
    #[default]
    Disallowed,
    /// Fall back to a proxy when the primary endpoint fails.
    Allowed,
}

impl ProxyPolicy {
    /// Returns true if proxy fallback is permitted.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl From<bool> for ProxyPolicy {
    fn from(allowed: bool) -> Self {
        if allowed { Self::Allowed } else { Self::Disallowed }
    }
}
