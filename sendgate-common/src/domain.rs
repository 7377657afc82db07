//! Domain newtype for type safety
//!
//! Wraps recipient domain strings so they cannot be confused with identity or
//! tenant identifiers. Domains are case-insensitive, so the stored form is
//! always trimmed and lowercased; `Gmail.com` and `gmail.com` share one
//! per-domain counter.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Deserializer, Serialize};

/// A normalised recipient domain
///
/// # Examples
///
/// ```
/// use sendgate_common::Domain;
///
/// let domain = Domain::new(" Example.COM ");
/// assert_eq!(domain.as_str(), "example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Create a new `Domain`, normalising case and surrounding whitespace
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        let raw: Arc<str> = s.into();
        let trimmed = raw.trim();

        if trimmed.len() == raw.len() && !trimmed.bytes().any(|b| b.is_ascii_uppercase()) {
            Self(raw)
        } else {
            Self(Arc::from(trimmed.to_ascii_lowercase()))
        }
    }

    /// Get the domain as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the domain part of an email address
    ///
    /// Returns `None` when the address has no `@` or an empty domain part.
    #[must_use]
    pub fn from_address(address: &str) -> Option<Self> {
        address
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim())
            .filter(|domain| !domain.is_empty())
            .map(Self::new)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
