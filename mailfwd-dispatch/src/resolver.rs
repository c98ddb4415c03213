//! Mapping of a validated event to delivery instructions

use mailfwd_common::address::fold_plus;
use serde::{Deserialize, Serialize};

use crate::{
    compiler::CompiledTable,
    error::ResolutionError,
    types::{InboundEmailEvent, StorageLocation},
};

/// Everything a delivery invoker needs to forward one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDelivery {
    pub source_location: StorageLocation,
    /// Deduplicated, in configured order
    pub destinations: Vec<String>,
    pub from_email: String,
    /// Prepended to the forwarded subject. Always empty: subjects pass through.
    pub subject_prefix: String,
    pub plus_sign_folding_enabled: bool,
    /// The folded `local@domain` the destinations were chosen for
    pub recipient: String,
    pub message_id: String,
}

/// Which rule produced the destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Alias,
    Fallback,
}

/// Resolve the destinations for `event`.
///
/// The recipient's `+suffix` is folded away before lookup. An exact alias
/// wins over the domain fallback.
///
/// # Errors
///
/// [`ResolutionError::UnknownDomain`] if no compiled domain owns the event's
/// storage prefix, [`ResolutionError::NoDestination`] if neither an alias nor
/// a fallback covers the recipient.
pub fn resolve(
    event: &InboundEmailEvent,
    table: &CompiledTable,
) -> Result<ResolvedDelivery, ResolutionError> {
    resolve_with_route(event, table).map(|(delivery, _)| delivery)
}

/// As [`resolve`], also reporting which rule matched.
///
/// # Errors
///
/// See [`resolve`].
pub fn resolve_with_route(
    event: &InboundEmailEvent,
    table: &CompiledTable,
) -> Result<(ResolvedDelivery, Route), ResolutionError> {
    let config = table
        .get(&event.storage_key_prefix)
        .ok_or_else(|| ResolutionError::UnknownDomain(event.storage_key_prefix.clone()))?;

    let recipient = format!(
        "{}@{}",
        fold_plus(&event.recipient_local_part).to_lowercase(),
        event.recipient_domain
    );

    let (destinations, route) = match config.alias(&recipient) {
        Some(destinations) => (destinations, Route::Alias),
        None if event.recipient_domain == config.domain => config
            .fallback
            .as_deref()
            .map(|fallback| (fallback, Route::Fallback))
            .ok_or_else(|| ResolutionError::NoDestination(recipient.clone()))?,
        None => return Err(ResolutionError::NoDestination(recipient)),
    };

    Ok((
        ResolvedDelivery {
            source_location: event.storage_location.clone(),
            destinations: dedup(destinations),
            from_email: config.from_email.clone(),
            subject_prefix: String::new(),
            plus_sign_folding_enabled: true,
            recipient,
            message_id: event.message_id.clone(),
        },
        route,
    ))
}

/// Order-preserving, case-insensitive deduplication
fn dedup(destinations: &[String]) -> Vec<String> {
    let mut seen = ahash::AHashSet::with_capacity(destinations.len());
    destinations
        .iter()
        .filter(|destination| seen.insert(destination.trim().to_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use mailfwd_common::Domain;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        compiler::compile,
        rules::{DomainRule, DomainRules},
    };

    fn table(rule: DomainRule) -> CompiledTable {
        let mut rules = DomainRules::new();
        rules.insert("example.com", rule);
        compile(&rules).unwrap()
    }

    fn event(local: &str) -> InboundEmailEvent {
        InboundEmailEvent {
            storage_key_prefix: "example.com/".to_string(),
            storage_location: StorageLocation {
                container: "mailbox".to_string(),
                object_key: "example.com/m1".to_string(),
            },
            recipient_domain: Domain::new("example.com"),
            recipient_local_part: local.to_string(),
            message_id: "m1".to_string(),
            source: "sender@ext.org".to_string(),
            spam_verdict: None,
            virus_verdict: None,
        }
    }

    #[test]
    fn test_alias_beats_fallback() {
        let table = table(
            DomainRule::default()
                .with_alias("info", &["a@x.com"])
                .with_fallback(&["catchall@x.com"]),
        );

        let (delivery, route) = resolve_with_route(&event("info"), &table).unwrap();
        assert_eq!(route, Route::Alias);
        assert_eq!(delivery.destinations, vec!["a@x.com".to_string()]);

        let (delivery, route) = resolve_with_route(&event("ghost"), &table).unwrap();
        assert_eq!(route, Route::Fallback);
        assert_eq!(delivery.destinations, vec!["catchall@x.com".to_string()]);
    }

    #[test]
    fn test_plus_folding_and_case() {
        let table = table(DomainRule::default().with_alias("user", &["u@x.com"]));

        let plain = resolve(&event("user"), &table).unwrap();
        let tagged = resolve(&event("User+Newsletter"), &table).unwrap();
        assert_eq!(plain, tagged);
        assert_eq!(tagged.recipient, "user@example.com");
    }

    #[test]
    fn test_destinations_deduplicated_in_order() {
        let table = table(
            DomainRule::default().with_alias("info", &["b@x.com", "a@x.com", "B@x.com", "a@x.com"]),
        );

        let delivery = resolve(&event("info"), &table).unwrap();
        assert_eq!(
            delivery.destinations,
            vec!["b@x.com".to_string(), "a@x.com".to_string()]
        );
    }

    #[test]
    fn test_unknown_domain() {
        let table = table(DomainRule::default().with_fallback(&["c@x.com"]));
        let mut event = event("info");
        event.storage_key_prefix = "elsewhere.org/".to_string();

        assert_eq!(
            resolve(&event, &table),
            Err(ResolutionError::UnknownDomain("elsewhere.org/".to_string()))
        );
    }

    #[test]
    fn test_empty_alias_without_fallback() {
        let table = table(DomainRule::default().with_alias("empty", &[]));
        assert_eq!(
            resolve(&event("empty"), &table),
            Err(ResolutionError::NoDestination("empty@example.com".to_string()))
        );
    }

    #[test]
    fn test_empty_alias_falls_through_to_fallback() {
        let table = table(
            DomainRule::default()
                .with_alias("empty", &[])
                .with_fallback(&["catchall@x.com"]),
        );
        let (delivery, route) = resolve_with_route(&event("empty"), &table).unwrap();
        assert_eq!(route, Route::Fallback);
        assert_eq!(delivery.destinations, vec!["catchall@x.com".to_string()]);
    }

    #[test]
    fn test_foreign_recipient_does_not_use_fallback() {
        let table = table(DomainRule::default().with_fallback(&["catchall@x.com"]));
        let mut event = event("someone");
        event.recipient_domain = Domain::new("other.org");

        assert_eq!(
            resolve(&event, &table),
            Err(ResolutionError::NoDestination("someone@other.org".to_string()))
        );
    }

    #[test]
    fn test_delivery_fields() {
        let table = table(DomainRule::default().with_alias("info", &["a@x.com"]));
        let delivery = resolve(&event("info"), &table).unwrap();

        assert_eq!(delivery.from_email, "noreply@example.com");
        assert_eq!(delivery.subject_prefix, "");
        assert!(delivery.plus_sign_folding_enabled);
        assert_eq!(delivery.message_id, "m1");
        assert_eq!(delivery.source_location.object_key, "example.com/m1");
    }
}
