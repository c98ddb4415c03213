//! Authored per-domain forwarding rules
//!
//! This is the shape operators write in the configuration file. Every field
//! except the alias destinations has a default, so a domain can be declared
//! with as little as a fallback address:
//!
//! ```ron
//! domains: {
//!     "example.com": (
//!         aliases: {
//!             "info": (description: "General enquiries", destinations: ["a@x.com", "b@x.com"]),
//!         },
//!         fallback_addresses: ["catchall@x.com"],
//!     ),
//! }
//! ```
//!
//! Defaults are applied once, by serde at load time; the compiler never
//! re-derives them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const fn default_enabled() -> bool {
    true
}

const fn default_scan_enabled() -> bool {
    true
}

fn default_from_local_part() -> String {
    "noreply".to_string()
}

/// Rule set for a single mail domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    /// Whether mail for this domain is forwarded at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Local part of the address forwarded mail is sent from
    #[serde(default = "default_from_local_part", alias = "fromEmailLocalPart")]
    pub from_email_local_part: String,

    /// Ask the receiving service to run spam and virus scanning
    #[serde(default = "default_scan_enabled", alias = "scanEnabled")]
    pub scan_enabled: bool,

    /// Ask the receiving service to refuse mail delivered without TLS
    #[serde(default, alias = "tlsEnforced")]
    pub tls_enforced: bool,

    /// Destinations for recipients no alias matches
    #[serde(default, alias = "fallbackAddresses")]
    pub fallback_addresses: Vec<String>,

    /// Named local parts and where their mail goes
    #[serde(default)]
    pub aliases: BTreeMap<String, AliasRule>,
}

impl Default for DomainRule {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            from_email_local_part: default_from_local_part(),
            scan_enabled: default_scan_enabled(),
            tls_enforced: false,
            fallback_addresses: Vec::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl DomainRule {
    /// Convenience for building rules in code
    #[must_use]
    pub fn with_alias(mut self, local_part: impl Into<String>, destinations: &[&str]) -> Self {
        self.aliases.insert(
            local_part.into(),
            AliasRule {
                description: String::new(),
                destinations: destinations.iter().map(ToString::to_string).collect(),
            },
        );
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, destinations: &[&str]) -> Self {
        self.fallback_addresses = destinations.iter().map(ToString::to_string).collect();
        self
    }
}

/// A single local part under a domain
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AliasRule {
    /// Free text, not used for routing
    #[serde(default)]
    pub description: String,

    /// Where mail for this alias is forwarded. Empty disables the alias.
    #[serde(default)]
    pub destinations: Vec<String>,
}

/// All authored domain rules, keyed by domain name as written
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainRules {
    domains: BTreeMap<String, DomainRule>,
}

impl DomainRules {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            domains: BTreeMap::new(),
        }
    }

    /// Add or replace the rule for a domain
    pub fn insert(&mut self, domain: impl Into<String>, rule: DomainRule) {
        self.domains.insert(domain.into(), rule);
    }

    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&DomainRule> {
        self.domains.get(domain)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DomainRule)> {
        self.domains.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl FromIterator<(String, DomainRule)> for DomainRules {
    fn from_iter<T: IntoIterator<Item = (String, DomainRule)>>(iter: T) -> Self {
        Self {
            domains: iter.into_iter().collect(),
        }
    }
}
