//! Property-based tests for table compilation and recipient resolution
//!
//! Random domain rules are compiled and resolved against recipients derived
//! from them, checking the lookup rules hold for every generated table.
#![allow(clippy::unwrap_used)]

use mailfwd_common::Domain;
use mailfwd_dispatch::{
    AliasRule, ConfigError, DomainRule, DomainRules, InboundEmailEvent, ResolutionError, Route,
    StorageLocation, compile,
    resolver::resolve_with_route,
};
use proptest::prelude::*;

const DOMAIN: &str = "example.com";

/// Strategy to generate alias local parts, already lowercase and without `+`
fn local_part_strategy() -> impl Strategy<Value = String> {
    #[allow(
        clippy::expect_used,
        reason = "compile-time constant regex should be valid"
    )]
    let regex = prop::string::string_regex("[a-z0-9][a-z0-9._-]{0,8}")
        .expect("local part regex should be valid");
    regex
}

/// Strategy to generate destination addresses
fn destination_strategy() -> impl Strategy<Value = String> {
    #[allow(
        clippy::expect_used,
        reason = "compile-time constant regex should be valid"
    )]
    let regex = prop::string::string_regex("[a-z]{1,8}@[a-z]{3,8}\\.(com|org|net)")
        .expect("destination regex should be valid");
    regex
}

/// Strategy to generate one domain's rules, with some aliases left empty
fn rule_strategy() -> impl Strategy<Value = DomainRule> {
    (
        prop::collection::btree_map(
            local_part_strategy(),
            prop::collection::vec(destination_strategy(), 0..4),
            0..6,
        ),
        prop::collection::vec(destination_strategy(), 0..3),
    )
        .prop_map(|(aliases, fallback_addresses)| DomainRule {
            fallback_addresses,
            aliases: aliases
                .into_iter()
                .map(|(local, destinations)| {
                    (
                        local,
                        AliasRule {
                            description: String::new(),
                            destinations,
                        },
                    )
                })
                .collect(),
            ..DomainRule::default()
        })
}

fn rules(rule: &DomainRule) -> DomainRules {
    let mut rules = DomainRules::new();
    rules.insert(DOMAIN, rule.clone());
    rules
}

fn event(local: &str) -> InboundEmailEvent {
    InboundEmailEvent {
        storage_key_prefix: format!("{DOMAIN}/"),
        storage_location: StorageLocation {
            container: "mailbox".to_string(),
            object_key: format!("{DOMAIN}/m1"),
        },
        recipient_domain: Domain::new(DOMAIN),
        recipient_local_part: local.to_string(),
        message_id: "m1".to_string(),
        source: "sender@ext.org".to_string(),
        spam_verdict: None,
        virus_verdict: None,
    }
}

/// First occurrence of each address, compared case-insensitively
fn unique(destinations: &[String]) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for destination in destinations {
        if !kept
            .iter()
            .any(|k| k.trim().eq_ignore_ascii_case(destination.trim()))
        {
            kept.push(destination.clone());
        }
    }
    kept
}

proptest! {
    /// Every alias with destinations gets exactly one entry, the fallback is
    /// kept only when non-empty
    #[test]
    fn test_compiled_entries_match_rules(rule in rule_strategy()) {
        let table = compile(&rules(&rule)).unwrap();
        let config = table.get("example.com/").unwrap();

        let non_empty = rule.aliases.values().filter(|a| !a.destinations.is_empty()).count();
        prop_assert_eq!(config.forward_mapping.len(), non_empty);

        for (local, alias) in &rule.aliases {
            let key = format!("{local}@{DOMAIN}");
            if alias.destinations.is_empty() {
                prop_assert!(config.alias(&key).is_none());
            } else {
                prop_assert_eq!(config.alias(&key).unwrap(), alias.destinations.as_slice());
            }
        }

        prop_assert_eq!(config.fallback.is_some(), !rule.fallback_addresses.is_empty());
    }

    /// Compiling the same rules twice gives the same table
    #[test]
    fn test_compile_is_deterministic(rule in rule_strategy()) {
        prop_assert_eq!(compile(&rules(&rule)).unwrap(), compile(&rules(&rule)).unwrap());
    }

    /// An alias matches regardless of case and of any `+suffix`, and always
    /// wins over the fallback
    #[test]
    fn test_alias_lookup_is_folded(
        rule in rule_strategy(),
        pick in any::<prop::sample::Index>(),
        suffix in "[a-z0-9]{0,6}",
    ) {
        let with_destinations: Vec<_> = rule
            .aliases
            .iter()
            .filter(|(_, alias)| !alias.destinations.is_empty())
            .collect();
        prop_assume!(!with_destinations.is_empty());

        let (local, alias) = with_destinations[pick.index(with_destinations.len())];
        let table = compile(&rules(&rule)).unwrap();

        for recipient in [
            local.clone(),
            local.to_uppercase(),
            format!("{local}+{suffix}"),
            format!("{}+{suffix}", local.to_uppercase()),
        ] {
            let (delivery, route) = resolve_with_route(&event(&recipient), &table).unwrap();
            prop_assert_eq!(route, Route::Alias);
            prop_assert_eq!(&delivery.recipient, &format!("{local}@{DOMAIN}"));
            prop_assert_eq!(delivery.destinations, unique(&alias.destinations));
        }
    }

    /// A recipient no alias covers gets the fallback, or no destination at all
    #[test]
    fn test_unmatched_recipient_uses_fallback(
        rule in rule_strategy(),
        local in local_part_strategy(),
    ) {
        prop_assume!(!rule.aliases.contains_key(&local));

        let table = compile(&rules(&rule)).unwrap();
        let resolved = resolve_with_route(&event(&local), &table);

        if rule.fallback_addresses.is_empty() {
            prop_assert!(matches!(resolved, Err(ResolutionError::NoDestination(_))));
        } else {
            let (delivery, route) = resolved.unwrap();
            prop_assert_eq!(route, Route::Fallback);
            prop_assert_eq!(delivery.destinations, unique(&rule.fallback_addresses));
        }
    }

    /// Resolved destinations never repeat an address
    #[test]
    fn test_destinations_are_unique(
        local in local_part_strategy(),
        destinations in prop::collection::vec(destination_strategy(), 1..4),
        repeats in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
    ) {
        let mut authored = destinations.clone();
        for pick in repeats {
            authored.push(destinations[pick.index(destinations.len())].to_uppercase());
        }

        let rule = DomainRule::default().with_alias(
            local.clone(),
            &authored.iter().map(String::as_str).collect::<Vec<_>>(),
        );
        let table = compile(&rules(&rule)).unwrap();
        let (delivery, _) = resolve_with_route(&event(&local), &table).unwrap();

        prop_assert_eq!(delivery.destinations, unique(&destinations));
    }

    /// Alias keys that only differ in case are rejected
    #[test]
    fn test_case_variant_aliases_rejected(local in "[a-z]{1,8}") {
        let rule = DomainRule::default()
            .with_alias(local.clone(), &["a@x.com"])
            .with_alias(local.to_uppercase(), &["b@x.com"]);

        prop_assert_eq!(
            compile(&rules(&rule)).unwrap_err(),
            ConfigError::DuplicateAlias {
                domain: DOMAIN.to_string(),
                alias: local,
            }
        );
    }
}
