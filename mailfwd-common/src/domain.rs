//! Domain newtype for type safety
//!
//! Wraps domain strings to prevent accidentally passing email addresses or
//! storage keys where a mail domain is expected. Domains are always held in
//! their lowercase, whitespace-trimmed form so that lookups are
//! case-insensitive by construction.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Deserializer, Serialize};

/// A normalised mail domain
///
/// # Examples
///
/// ```
/// use mailfwd_common::Domain;
///
/// let domain = Domain::new(" Example.COM ");
/// assert_eq!(domain.as_str(), "example.com");
/// assert_eq!(domain.key_prefix(), "example.com/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Create a new `Domain`, trimming and lowercasing the input
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref().trim().to_ascii_lowercase()))
    }

    /// Get the domain as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The storage key prefix under which mail for this domain is written
    #[must_use]
    pub fn key_prefix(&self) -> String {
        format!("{}/", self.0)
    }

    /// The bare `@domain` marker used to describe the domain-wide catch-all
    #[must_use]
    pub fn wildcard(&self) -> String {
        format!("@{}", self.0)
    }

    /// Recover the domain from a storage key prefix such as `example.com/`
    ///
    /// Returns `None` if the prefix does not end in exactly one `/` or names
    /// no domain.
    #[must_use]
    pub fn from_key_prefix(prefix: &str) -> Option<Self> {
        let domain = prefix.strip_suffix('/')?;
        if domain.is_empty() || domain.contains('/') {
            return None;
        }
        Some(Self::new(domain))
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
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

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::new)
    }
}
