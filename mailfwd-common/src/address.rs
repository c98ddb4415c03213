use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Domain;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Address has no '@': {0}")]
    MissingAt(String),

    #[error("Address has an empty local part: {0}")]
    EmptyLocalPart(String),

    #[error("Address has an empty domain: {0}")]
    EmptyDomain(String),
}

/// A bare `local@domain` mailbox address
///
/// The domain is normalised via [`Domain`]; the local part is kept as written
/// so that it can be echoed back, and lowercased only for lookups.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    local_part: String,
    domain: Domain,
}

impl EmailAddress {
    #[must_use]
    pub fn new(local_part: impl Into<String>, domain: impl Into<Domain>) -> Self {
        Self {
            local_part: local_part.into(),
            domain: domain.into(),
        }
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The address with any `+suffix` removed from the local part
    ///
    /// ```
    /// use mailfwd_common::EmailAddress;
    ///
    /// let address: EmailAddress = "user+tag@example.com".parse().unwrap();
    /// assert_eq!(address.folded().to_string(), "user@example.com");
    /// ```
    #[must_use]
    pub fn folded(&self) -> Self {
        Self {
            local_part: fold_plus(&self.local_part).to_string(),
            domain: self.domain.clone(),
        }
    }

    /// Lowercased `local@domain` form used as a lookup key
    #[must_use]
    pub fn lookup_key(&self) -> String {
        format!("{}@{}", self.local_part.to_lowercase(), self.domain)
    }
}

/// Strip a `+suffix` from a local part
#[must_use]
pub fn fold_plus(local_part: &str) -> &str {
    local_part
        .split_once('+')
        .map_or(local_part, |(base, _)| base)
}

impl FromStr for EmailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed
            .rsplit_once('<')
            .and_then(|(_, rest)| rest.strip_suffix('>'))
            .unwrap_or(trimmed);

        let (local, domain) = bare
            .rsplit_once('@')
            .ok_or_else(|| AddressError::MissingAt(s.to_string()))?;

        if local.is_empty() {
            return Err(AddressError::EmptyLocalPart(s.to_string()));
        }

        if domain.trim().is_empty() {
            return Err(AddressError::EmptyDomain(s.to_string()));
        }

        Ok(Self::new(local, domain))
    }
}

impl Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}
