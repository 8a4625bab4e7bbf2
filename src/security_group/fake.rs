//! In-memory security group that behaves like the Tencent Cloud API: new rules are inserted at
//! the head of the list and every policy index is the rule's current position.

use crate::error::Error;
use crate::security_group::{BackendFuture, NewPolicy, RawPolicy, SecurityGroupBackend};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Describe,
    Create(NewPolicy),
    Delete(i64),
}

#[derive(Default)]
struct State {
    rules: Vec<RawPolicy>,
    calls: Vec<Call>,
    fail_creates: bool,
    fail_deletes: bool,
    fail_describe_after: Option<usize>,
}

pub struct FakeSecurityGroup {
    state: Mutex<State>,
}

fn rejected(action: &str) -> Error {
    Error::RemoteApi {
        code: "InvalidParameterValue".to_string(),
        message: format!("{action} rejected by fake"),
        request_id: "fake-request".to_string(),
    }
}

impl FakeSecurityGroup {
    pub fn with_rules(rules: Vec<RawPolicy>) -> Self {
        Self {
            state: Mutex::new(State {
                rules,
                ..Default::default()
            }),
        }
    }

    pub fn fail_creates(&self) {
        self.state.lock().unwrap().fail_creates = true;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    /// Lets `count` describe calls through, then fails every further one with a transport error.
    pub fn fail_describe_after(&self, count: usize) {
        self.state.lock().unwrap().fail_describe_after = Some(count);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Describe))
    }

    pub fn delete_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Delete(_)))
    }

    pub fn create_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Create(_)))
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| predicate(c))
            .count()
    }

    /// Current rules, indexed by position.
    pub fn rules(&self) -> Vec<RawPolicy> {
        Self::indexed(&self.state.lock().unwrap().rules)
    }

    fn indexed(rules: &[RawPolicy]) -> Vec<RawPolicy> {
        rules
            .iter()
            .enumerate()
            .map(|(index, rule)| RawPolicy {
                policy_index: Some(index as i64),
                ..rule.clone()
            })
            .collect()
    }
}

impl SecurityGroupBackend for FakeSecurityGroup {
    fn describe_ingress<'a>(
        &'a self,
        _security_group_id: &'a str,
    ) -> BackendFuture<'a, Vec<RawPolicy>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let previous = state
                .calls
                .iter()
                .filter(|c| matches!(c, Call::Describe))
                .count();
            state.calls.push(Call::Describe);

            if matches!(state.fail_describe_after, Some(limit) if previous >= limit) {
                return Err(Error::Transport {
                    endpoint: "fake".to_string(),
                    message: "connection reset".to_string(),
                });
            }

            Ok(Self::indexed(&state.rules))
        })
    }

    fn create_ingress<'a>(
        &'a self,
        _security_group_id: &'a str,
        policy: &'a NewPolicy,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Create(policy.clone()));

            if state.fail_creates {
                return Err(rejected("create"));
            }

            state.rules.insert(
                0,
                RawPolicy {
                    description: Some(policy.description.clone()),
                    protocol: Some(policy.protocol.clone()),
                    port: Some(policy.port.clone()),
                    cidr_block: Some(policy.cidr_block.clone()),
                    action: Some(policy.action.as_str().to_string()),
                    policy_index: None,
                    modify_time: None,
                },
            );
            Ok(())
        })
    }

    fn delete_ingress<'a>(
        &'a self,
        _security_group_id: &'a str,
        policy_index: i64,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Delete(policy_index));

            if state.fail_deletes {
                return Err(rejected("delete"));
            }

            let position = usize::try_from(policy_index)
                .ok()
                .filter(|p| *p < state.rules.len())
                .ok_or_else(|| rejected("delete of missing index"))?;
            state.rules.remove(position);
            Ok(())
        })
    }
}
