//! Open and close endpoints by rewriting their security group rules.
//!
//! The provider has no "modify rule" call, so each operation is a sequence of creates and
//! deletes. Policy indices shift after every mutation; any delete that follows another
//! mutation uses an index from a fresh fetch.
//!
//! Partial states:
//! - CLOSE: the DROP rule was created but the ACCEPT rule could not be removed. Both rules
//!   exist and the result is reported as [`Error::AmbiguousState`].
//! - OPEN: stale rules could not all be removed (counted in the report), or they were removed
//!   and creating the new ACCEPT rule failed, leaving the endpoint without a rule.

use crate::error::{Error, Phase, Result};
use crate::manifest::ProxyDefinition;
use crate::public_ip::{self, PublicIpResolver};
use crate::recognition_tag;
use crate::security_group::{
    fetch_managed_rules, ManagedRule, NewPolicy, PolicyAction, SecurityGroupBackend,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    pub service: String,
    pub kind: MutationKind,
    pub cidr_block: String,
    pub removed_rules: usize,
    /// Stale rules that OPEN failed to delete
    pub stale_rules_left: usize,
    pub detail: String,
}

pub struct Mutator<'a> {
    backend: &'a dyn SecurityGroupBackend,
    security_group_id: &'a str,
}

impl<'a> Mutator<'a> {
    pub fn new(backend: &'a dyn SecurityGroupBackend, security_group_id: &'a str) -> Self {
        Self {
            backend,
            security_group_id,
        }
    }

    /// Allows traffic from the public IP found by `ip_resolver`, replacing every rule tagged for
    /// this proxy.
    pub async fn open(
        &self,
        proxy: &ProxyDefinition,
        ip_resolver: &PublicIpResolver,
    ) -> Result<MutationReport> {
        let service = proxy.name.as_str();
        let protocol = match proxy.protocol {
            Some(protocol) if proxy.is_valid() => protocol,
            _ => return Err(Error::UnknownEndpoint(proxy.name.clone())),
        };

        let ip = ip_resolver
            .resolve()
            .await
            .map_err(|e| e.in_phase(service, Phase::ResolvePublicIp))?;
        let cidr_block = public_ip::host_cidr(ip).to_string();

        log::info!("Opening '{}' for {}", service, cidr_block);

        let rules = fetch_managed_rules(self.backend, self.security_group_id)
            .await
            .map_err(|e| e.in_phase(service, Phase::FetchRules))?;

        let mut stale_rules_left = 0;
        let mut stale_indices = Vec::new();
        for rule in rules.iter().filter(|r| r.service_name == service) {
            match rule.policy_index {
                Some(index) => stale_indices.push(index),
                None => {
                    log::warn!("Rule '{}' has no policy index, leaving it", rule.description);
                    stale_rules_left += 1;
                }
            }
        }

        let mut removed_rules = 0;
        for index in descending(stale_indices) {
            match self
                .backend
                .delete_ingress(self.security_group_id, index)
                .await
            {
                Ok(()) => removed_rules += 1,
                Err(e) => {
                    log::warn!(
                        "Failed to delete stale rule of '{}' at index {}, continuing: {}",
                        service,
                        index,
                        e
                    );
                    stale_rules_left += 1;
                }
            }
        }

        let policy = NewPolicy {
            protocol: protocol.as_str().to_string(),
            port: proxy.remote_port.to_string(),
            cidr_block: cidr_block.clone(),
            action: PolicyAction::Accept,
            description: recognition_tag::encode(service, proxy.local_port),
        };

        self.backend
            .create_ingress(self.security_group_id, &policy)
            .await
            .map_err(|e| e.in_phase(service, Phase::CreateAcceptRule))?;

        let mut detail = format!(
            "{} {} open for {} (local port {})",
            protocol, proxy.remote_port, cidr_block, proxy.local_port
        );
        if stale_rules_left > 0 {
            detail.push_str(&format!(
                "; {} stale rule(s) could not be removed",
                stale_rules_left
            ));
        }

        Ok(MutationReport {
            service: service.to_string(),
            kind: MutationKind::Open,
            cidr_block,
            removed_rules,
            stale_rules_left,
            detail,
        })
    }

    /// Replaces the ACCEPT `rule` of `proxy` with an equivalent DROP rule.
    pub async fn close(
        &self,
        proxy: &ProxyDefinition,
        rule: &ManagedRule,
    ) -> Result<MutationReport> {
        let service = proxy.name.as_str();
        if !rule.is_accept() {
            return Err(Error::NotOpen(proxy.name.clone()));
        }

        log::info!(
            "Closing '{}' ({} {} from {})",
            service,
            rule.protocol,
            rule.port,
            rule.cidr_block
        );

        let drop_policy = NewPolicy {
            protocol: rule.protocol.clone(),
            port: rule.port.clone(),
            cidr_block: rule.cidr_block.clone(),
            action: PolicyAction::Drop,
            description: rule.description.clone(),
        };

        self.backend
            .create_ingress(self.security_group_id, &drop_policy)
            .await
            .map_err(|e| e.in_phase(service, Phase::CreateDropRule))?;

        let ambiguous = |detail: String| Error::AmbiguousState {
            service: service.to_string(),
            detail: format!(
                "{detail}; both an ACCEPT and a DROP rule for {} {} from {} exist, \
                 remove the ACCEPT rule manually",
                rule.protocol, rule.port, rule.cidr_block
            ),
        };

        let rules = fetch_managed_rules(self.backend, self.security_group_id)
            .await
            .map_err(|e| {
                ambiguous(format!(
                    "re-fetching rules after creating the DROP rule failed: {e}"
                ))
            })?;

        let mut accept_indices = Vec::new();
        for current in rules.iter().filter(|r| {
            r.is_accept()
                && r.description == rule.description
                && r.protocol == rule.protocol
                && r.port == rule.port
                && r.cidr_block == rule.cidr_block
        }) {
            match current.policy_index {
                Some(index) => accept_indices.push(index),
                None => return Err(ambiguous("the ACCEPT rule has no policy index".to_string())),
            }
        }

        if accept_indices.is_empty() {
            log::warn!(
                "ACCEPT rule of '{}' disappeared before it could be deleted",
                service
            );
        }

        let mut removed_rules = 0;
        for index in descending(accept_indices) {
            self.backend
                .delete_ingress(self.security_group_id, index)
                .await
                .map_err(|e| {
                    ambiguous(format!("deleting the ACCEPT rule at index {index} failed: {e}"))
                })?;
            removed_rules += 1;
        }

        Ok(MutationReport {
            service: service.to_string(),
            kind: MutationKind::Close,
            cidr_block: rule.cidr_block.clone(),
            removed_rules,
            stale_rules_left: 0,
            detail: format!(
                "{} {} now blocked for {}",
                rule.protocol, rule.port, rule.cidr_block
            ),
        })
    }
}

/// Deleting the highest index first keeps the remaining (lower) indices valid.
fn descending(mut indices: Vec<i64>) -> Vec<i64> {
    indices.sort_unstable_by(|a, b| b.cmp(a));
    indices.dedup();
    indices
}
