#[cfg(test)]
pub mod fake;
mod tc3;
pub mod tencent;

use crate::error::Result;
use crate::recognition_tag;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Ingress rule operations of a cloud security group.
///
/// Policy indices are positions in the provider's rule list and may change after *any*
/// mutation, so an index is only meaningful right after the `describe_ingress` call that
/// returned it.
pub trait SecurityGroupBackend: Send + Sync {
    fn describe_ingress<'a>(
        &'a self,
        security_group_id: &'a str,
    ) -> BackendFuture<'a, Vec<RawPolicy>>;

    fn create_ingress<'a>(
        &'a self,
        security_group_id: &'a str,
        policy: &'a NewPolicy,
    ) -> BackendFuture<'a, ()>;

    fn delete_ingress<'a>(
        &'a self,
        security_group_id: &'a str,
        policy_index: i64,
    ) -> BackendFuture<'a, ()>;
}

/// A rule as returned by the provider. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPolicy {
    pub description: Option<String>,
    pub protocol: Option<String>,
    pub port: Option<String>,
    pub cidr_block: Option<String>,
    pub action: Option<String>,
    pub policy_index: Option<i64>,
    pub modify_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPolicy {
    pub protocol: String,
    pub port: String,
    pub cidr_block: String,
    pub action: PolicyAction,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyAction {
    Accept,
    Drop,
}

impl PolicyAction {
    pub fn parse(input: &str) -> Option<PolicyAction> {
        if input.eq_ignore_ascii_case("ACCEPT") {
            Some(PolicyAction::Accept)
        } else if input.eq_ignore_ascii_case("DROP") {
            Some(PolicyAction::Drop)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Drop => "DROP",
        }
    }
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetched rule carrying our recognition tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedRule {
    pub description: String,
    pub service_name: String,
    pub local_port: Option<u16>,
    pub protocol: String,
    pub port: String,
    pub cidr_block: String,
    pub action: Option<PolicyAction>,
    pub policy_index: Option<i64>,
    pub modify_time: Option<String>,
}

impl ManagedRule {
    /// Returns `None` for rules we do not own. Missing fields degrade to empty values.
    pub fn from_raw(raw: RawPolicy) -> Option<ManagedRule> {
        let description = raw.description?;
        if !recognition_tag::is_tagged(&description) {
            return None;
        }

        let tag = recognition_tag::decode(&description);

        let action = raw.action.as_deref().and_then(PolicyAction::parse);
        if action.is_none() {
            log::debug!(
                "Rule '{}' has unrecognized action {:?}",
                description,
                raw.action
            );
        }

        Some(ManagedRule {
            service_name: tag.service_name,
            local_port: tag.local_port,
            protocol: raw.protocol.unwrap_or_default().to_ascii_uppercase(),
            port: raw.port.unwrap_or_default(),
            cidr_block: raw.cidr_block.unwrap_or_default(),
            action,
            policy_index: raw.policy_index,
            modify_time: raw.modify_time,
            description,
        })
    }

    pub fn is_accept(&self) -> bool {
        self.action == Some(PolicyAction::Accept)
    }
}

pub type RuleMap = HashMap<String, ManagedRule>;

/// Fetches every tagged ingress rule, in provider order.
pub async fn fetch_managed_rules(
    backend: &dyn SecurityGroupBackend,
    security_group_id: &str,
) -> Result<Vec<ManagedRule>> {
    log::debug!("Fetching ingress rules of security group {}", security_group_id);

    let raw_policies = backend.describe_ingress(security_group_id).await?;
    let total = raw_policies.len();

    let rules: Vec<_> = raw_policies
        .into_iter()
        .filter_map(ManagedRule::from_raw)
        .collect();

    log::info!(
        "Security group {} has {} ingress rules, {} of them managed by frp-sg",
        security_group_id,
        total,
        rules.len()
    );

    Ok(rules)
}

/// Fetches tagged rules keyed by service name. Later rules win over earlier ones with the
/// same name.
pub async fn fetch_rule_map(
    backend: &dyn SecurityGroupBackend,
    security_group_id: &str,
) -> Result<RuleMap> {
    Ok(into_rule_map(
        fetch_managed_rules(backend, security_group_id).await?,
    ))
}

pub fn into_rule_map(rules: Vec<ManagedRule>) -> RuleMap {
    let mut map = RuleMap::with_capacity(rules.len());

    for rule in rules {
        if let Some(previous) = map.get(&rule.service_name) {
            log::warn!(
                "Several rules are tagged for '{}' ({} {} and {} {}), using the latter",
                rule.service_name,
                previous.action.map(|a| a.as_str()).unwrap_or("?"),
                previous.cidr_block,
                rule.action.map(|a| a.as_str()).unwrap_or("?"),
                rule.cidr_block,
            );
        }
        map.insert(rule.service_name.clone(), rule);
    }

    map
}

/// The first ACCEPT rule tagged for `service_name` in provider order, i.e. the newest one.
///
/// Unlike [`into_rule_map`], a DROP rule that an OPEN failed to clean up does not hide it.
pub fn find_accept_rule<'r>(
    rules: &'r [ManagedRule],
    service_name: &str,
) -> Option<&'r ManagedRule> {
    rules
        .iter()
        .find(|rule| rule.service_name == service_name && rule.is_accept())
}
