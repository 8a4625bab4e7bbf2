use crate::manifest::ProxyDefinition;
use crate::security_group::{ManagedRule, PolicyAction, RuleMap};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointStatus {
    /// An ACCEPT rule exists
    Open,
    /// A DROP rule exists
    Blocked,
    /// No tagged rule exists
    Unmanaged,
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.pad(match self {
            Self::Open => "OPEN",
            Self::Blocked => "BLOCKED",
            Self::Unmanaged => "UNMANAGED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub proxy: ProxyDefinition,
    pub status: EndpointStatus,
    pub rule: Option<ManagedRule>,
}

/// Classifies every valid manifest entry, in manifest order.
///
/// Rules are matched by service name alone; a rule whose protocol or port differs from the
/// manifest entry still determines the status.
pub fn classify(manifest: &[ProxyDefinition], rules: &RuleMap) -> Vec<Classification> {
    manifest
        .iter()
        .filter(|proxy| {
            if proxy.is_valid() {
                return true;
            }
            log::warn!(
                "Skipping invalid proxy definition '{}' (type: {}, remote port: {})",
                proxy.name,
                proxy
                    .protocol
                    .map(|p| p.as_str())
                    .unwrap_or("unsupported"),
                proxy.remote_port
            );
            false
        })
        .map(|proxy| {
            let rule = rules.get(&proxy.name).cloned();

            let status = match rule.as_ref().and_then(|r| r.action) {
                Some(PolicyAction::Accept) => EndpointStatus::Open,
                Some(PolicyAction::Drop) => EndpointStatus::Blocked,
                None => EndpointStatus::Unmanaged,
            };

            if let Some(rule) = &rule {
                if !binding_matches(proxy, rule) {
                    log::debug!(
                        "Rule for '{}' is {} {} but the manifest declares {} {}",
                        proxy.name,
                        rule.protocol,
                        rule.port,
                        proxy.protocol.map(|p| p.as_str()).unwrap_or_default(),
                        proxy.remote_port
                    );
                }
            }

            Classification {
                proxy: proxy.clone(),
                status,
                rule,
            }
        })
        .collect()
}

fn binding_matches(proxy: &ProxyDefinition, rule: &ManagedRule) -> bool {
    proxy
        .protocol
        .is_some_and(|p| p.as_str().eq_ignore_ascii_case(&rule.protocol))
        && rule.port == proxy.remote_port.to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::Protocol;
    use maplit::hashmap;
    use proptest::prelude::*;

    fn proxy(name: &str, protocol: Option<Protocol>, remote: u16) -> ProxyDefinition {
        ProxyDefinition {
            name: name.to_string(),
            protocol,
            local_port: 80,
            remote_port: remote,
        }
    }

    fn rule(name: &str, action: Option<PolicyAction>) -> ManagedRule {
        ManagedRule {
            description: format!("AlfredFRP_{name}_local80"),
            service_name: name.to_string(),
            local_port: Some(80),
            protocol: "TCP".to_string(),
            port: "8080".to_string(),
            cidr_block: "198.51.100.7/32".to_string(),
            action,
            policy_index: Some(0),
            modify_time: None,
        }
    }

    fn statuses(result: &[Classification]) -> Vec<(&str, EndpointStatus)> {
        result
            .iter()
            .map(|c| (c.proxy.name.as_str(), c.status))
            .collect()
    }

    #[test]
    fn open_blocked_unmanaged() {
        let manifest = vec![proxy("web", Some(Protocol::Tcp), 8080)];

        let open = classify(
            &manifest,
            &hashmap! { "web".to_string() => rule("web", Some(PolicyAction::Accept)) },
        );
        assert_eq!(statuses(&open), vec![("web", EndpointStatus::Open)]);
        assert_eq!(open[0].rule, Some(rule("web", Some(PolicyAction::Accept))));

        let blocked = classify(
            &manifest,
            &hashmap! { "web".to_string() => rule("web", Some(PolicyAction::Drop)) },
        );
        assert_eq!(statuses(&blocked), vec![("web", EndpointStatus::Blocked)]);

        let unmanaged = classify(&manifest, &RuleMap::new());
        assert_eq!(statuses(&unmanaged), vec![("web", EndpointStatus::Unmanaged)]);
        assert_eq!(unmanaged[0].rule, None);
    }

    #[test]
    fn unknown_action_is_unmanaged() {
        let result = classify(
            &[proxy("web", Some(Protocol::Tcp), 8080)],
            &hashmap! { "web".to_string() => rule("web", None) },
        );
        assert_eq!(statuses(&result), vec![("web", EndpointStatus::Unmanaged)]);
    }

    #[test]
    fn manifest_order_and_invalid_entries() {
        let manifest = vec![
            proxy("zeta", Some(Protocol::Udp), 3478),
            proxy("no-port", Some(Protocol::Tcp), 0),
            proxy("alpha", Some(Protocol::Tcp), 22),
            proxy("", Some(Protocol::Tcp), 23),
            proxy("no-type", None, 24),
            proxy("web", Some(Protocol::Tcp), 8080),
        ];
        let rules = hashmap! {
            "web".to_string() => rule("web", Some(PolicyAction::Accept)),
            "alpha".to_string() => rule("alpha", Some(PolicyAction::Drop)),
            "no-port".to_string() => rule("no-port", Some(PolicyAction::Accept)),
            "other".to_string() => rule("other", Some(PolicyAction::Accept)),
        };

        assert_eq!(
            statuses(&classify(&manifest, &rules)),
            vec![
                ("zeta", EndpointStatus::Unmanaged),
                ("alpha", EndpointStatus::Blocked),
                ("web", EndpointStatus::Open),
            ]
        );
    }

    #[test]
    fn name_match_wins_over_binding_mismatch() {
        let result = classify(
            &[proxy("web", Some(Protocol::Udp), 9090)],
            &hashmap! { "web".to_string() => rule("web", Some(PolicyAction::Accept)) },
        );
        assert_eq!(statuses(&result), vec![("web", EndpointStatus::Open)]);
    }

    #[test]
    fn binding_comparison() {
        let r = rule("web", Some(PolicyAction::Accept));
        assert!(binding_matches(&proxy("web", Some(Protocol::Tcp), 8080), &r));
        assert!(!binding_matches(&proxy("web", Some(Protocol::Udp), 8080), &r));
        assert!(!binding_matches(&proxy("web", Some(Protocol::Tcp), 8081), &r));
    }

    fn arb_proxy() -> impl Strategy<Value = ProxyDefinition> {
        (
            "[a-d]{0,2}",
            prop::option::of(prop_oneof![Just(Protocol::Tcp), Just(Protocol::Udp)]),
            0u16..4,
        )
            .prop_map(|(name, protocol, remote)| proxy(&name, protocol, remote))
    }

    fn arb_rules() -> impl Strategy<Value = RuleMap> {
        prop::collection::hash_map(
            "[a-d]{1,2}",
            prop::option::of(prop_oneof![
                Just(PolicyAction::Accept),
                Just(PolicyAction::Drop)
            ]),
            0..6,
        )
        .prop_map(|entries| {
            entries
                .into_iter()
                .map(|(name, action)| {
                    let rule = rule(&name, action);
                    (name, rule)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn every_valid_entry_once_in_manifest_order(
            manifest in prop::collection::vec(arb_proxy(), 0..8),
            rules in arb_rules(),
        ) {
            let result = classify(&manifest, &rules);

            let expected: Vec<&ProxyDefinition> =
                manifest.iter().filter(|p| p.is_valid()).collect();
            let classified: Vec<&ProxyDefinition> = result.iter().map(|c| &c.proxy).collect();
            prop_assert_eq!(classified, expected);

            for classification in &result {
                let status = match rules.get(&classification.proxy.name).and_then(|r| r.action) {
                    Some(PolicyAction::Accept) => EndpointStatus::Open,
                    Some(PolicyAction::Drop) => EndpointStatus::Blocked,
                    None => EndpointStatus::Unmanaged,
                };
                prop_assert_eq!(classification.status, status);
            }
        }
    }
}
