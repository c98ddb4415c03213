//! Flattening of authored rules into the dispatch-time lookup table

use std::{collections::BTreeMap, sync::Arc};

use mailfwd_common::Domain;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::ConfigError,
    rules::{DomainRule, DomainRules},
};

/// Runtime form of one domain's rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledDomainConfig {
    pub domain: Domain,

    /// Full sender address, `from_email_local_part@domain`
    pub from_email: String,

    /// Lowercased `local@domain` to destinations, one entry per alias with
    /// at least one destination
    pub forward_mapping: BTreeMap<String, Vec<String>>,

    /// Catch-all destinations, present only when non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Vec<String>>,

    #[serde(default)]
    pub scan_enabled: bool,

    #[serde(default)]
    pub tls_enforced: bool,
}

impl CompiledDomainConfig {
    /// The `@domain` marker the fallback entry stands for
    #[must_use]
    pub fn wildcard_key(&self) -> String {
        self.domain.wildcard()
    }

    /// Exact alias lookup, `key` must already be folded and lowercased
    #[must_use]
    pub fn alias(&self, key: &str) -> Option<&[String]> {
        self.forward_mapping.get(key).map(Vec::as_slice)
    }
}

/// Storage key prefix to compiled domain
///
/// Immutable once built; share it behind an [`Arc`] between concurrent
/// dispatches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompiledTable {
    entries: BTreeMap<String, CompiledDomainConfig>,
}

impl CompiledTable {
    #[must_use]
    pub fn get(&self, prefix: &str) -> Option<&CompiledDomainConfig> {
        self.entries.get(prefix)
    }

    /// Whether any compiled domain is `domain`
    #[must_use]
    pub fn has_domain(&self, domain: &Domain) -> bool {
        self.entries.contains_key(&domain.key_prefix())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CompiledDomainConfig)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Compile authored rules into a [`CompiledTable`].
///
/// Disabled domains are left out of the table, so their mail resolves as an
/// unknown domain.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a domain or alias key is empty, or if two
/// domain keys (or two alias keys of one domain) only differ in case.
pub fn compile(rules: &DomainRules) -> Result<CompiledTable, ConfigError> {
    let mut entries = BTreeMap::new();
    let mut seen = ahash::AHashSet::new();

    for (name, rule) in rules.iter() {
        let domain = Domain::new(name);
        if domain.is_empty() {
            return Err(ConfigError::EmptyDomain);
        }

        if !seen.insert(domain.clone()) {
            return Err(ConfigError::DuplicateDomain(domain.to_string()));
        }

        if !rule.enabled {
            info!(domain = %domain, "Domain disabled, leaving it out of the forwarding table");
            continue;
        }

        entries.insert(domain.key_prefix(), compile_domain(domain, rule)?);
    }

    Ok(CompiledTable { entries })
}

fn compile_domain(domain: Domain, rule: &DomainRule) -> Result<CompiledDomainConfig, ConfigError> {
    let mut forward_mapping = BTreeMap::new();
    let mut seen = ahash::AHashSet::new();

    for (local_part, alias) in &rule.aliases {
        let local_part = local_part.trim();
        if local_part.is_empty() {
            return Err(ConfigError::EmptyAlias(domain.to_string()));
        }

        let local_part = local_part.to_lowercase();
        let address = format!("{local_part}@{domain}");

        if !seen.insert(address.clone()) {
            return Err(ConfigError::DuplicateAlias {
                domain: domain.to_string(),
                alias: local_part,
            });
        }

        if alias.destinations.is_empty() {
            warn!(
                domain = %domain,
                alias = %address,
                has_fallback = !rule.fallback_addresses.is_empty(),
                "Alias has no destinations and is left out of the forwarding table"
            );
            continue;
        }

        forward_mapping.insert(address, alias.destinations.clone());
    }

    let fallback =
        (!rule.fallback_addresses.is_empty()).then(|| rule.fallback_addresses.clone());

    Ok(CompiledDomainConfig {
        from_email: format!("{}@{domain}", rule.from_email_local_part),
        forward_mapping,
        fallback,
        scan_enabled: rule.scan_enabled,
        tls_enforced: rule.tls_enforced,
        domain,
    })
}
