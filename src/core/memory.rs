//! In-memory resource client
//!
//! Holds policies in a map and records every call. Failures can be scripted
//! per mutation index, and a cancellation token can be fired after a number
//! of successful mutations, which makes partial-apply behaviour easy to
//! reproduce in tests.

use crate::core::client::{ClientResult, PolicyLifecycle, ResourceClient};
use crate::core::error::ClientError;
use crate::core::policy::{SecurityPolicy, SecurityRule};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// A call received by [`MemoryClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Fetch(String),
    Upsert { policy: String, rule: String },
    Delete { policy: String, rule: String },
    List,
    CreatePolicy(String),
    DeletePolicy(String),
}

#[derive(Debug, Default)]
struct State {
    policies: BTreeMap<String, SecurityPolicy>,
    calls: Vec<ClientCall>,
    /// Upserts and deletes attempted so far
    mutations: usize,
    /// Upserts and deletes that succeeded
    succeeded: usize,
    failures: HashMap<usize, ClientError>,
    fetch_failure: Option<ClientError>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl State {
    /// Counts a mutation attempt and returns its scripted failure, if any.
    fn begin_mutation(&mut self) -> ClientResult<()> {
        let index = self.mutations;
        self.mutations += 1;
        match self.failures.remove(&index) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn mutation_succeeded(&mut self) {
        self.succeeded += 1;
        if let Some((after, token)) = &self.cancel_after
            && self.succeeded >= *after
        {
            token.cancel();
        }
    }
}

/// Resource client backed by a map
#[derive(Debug, Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a policy (builder form).
    pub fn with_policy(self, policy: SecurityPolicy) -> Self {
        self.insert_policy(policy);
        self
    }

    /// Seeds or replaces a policy without recording a call.
    pub fn insert_policy(&self, policy: SecurityPolicy) {
        self.state().policies.insert(policy.name.clone(), policy);
    }

    /// Current state of a policy
    pub fn policy(&self, name: &str) -> Option<SecurityPolicy> {
        self.state().policies.get(name).cloned()
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<ClientCall> {
        self.state().calls.clone()
    }

    /// Makes the mutation with zero-based index `index` fail with `error`.
    pub fn fail_mutation(&self, index: usize, error: ClientError) {
        self.state().failures.insert(index, error);
    }

    /// Makes the next fetch fail with `error`.
    pub fn fail_next_fetch(&self, error: ClientError) {
        self.state().fetch_failure = Some(error);
    }

    /// Cancels `token` once `count` mutations have succeeded.
    pub fn cancel_after(&self, count: usize, token: CancellationToken) {
        self.state().cancel_after = Some((count, token));
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn fetch(&self, policy_name: &str) -> ClientResult<SecurityPolicy> {
        let mut state = self.state();
        state.calls.push(ClientCall::Fetch(policy_name.to_string()));

        if let Some(err) = state.fetch_failure.take() {
            return Err(err);
        }

        state
            .policies
            .get(policy_name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("policy '{policy_name}'")))
    }

    async fn upsert_rule(&self, policy_name: &str, rule: &SecurityRule) -> ClientResult<()> {
        let mut state = self.state();
        state.begin_mutation()?;

        let policy = state
            .policies
            .entry(policy_name.to_string())
            .or_insert_with(|| SecurityPolicy::new(policy_name));

        if let Some(holder) = policy.rule_at(rule.direction, rule.priority)
            && holder.name != rule.name
        {
            return Err(ClientError::Conflict(format!(
                "{} priority {} in '{policy_name}' is held by '{}'",
                rule.direction, rule.priority, holder.name
            )));
        }

        policy.put_rule(rule.clone());
        state.calls.push(ClientCall::Upsert {
            policy: policy_name.to_string(),
            rule: rule.name.clone(),
        });
        state.mutation_succeeded();
        Ok(())
    }

    async fn delete_rule(&self, policy_name: &str, rule_name: &str) -> ClientResult<()> {
        let mut state = self.state();
        state.begin_mutation()?;

        let removed = state
            .policies
            .get_mut(policy_name)
            .ok_or_else(|| ClientError::NotFound(format!("policy '{policy_name}'")))?
            .take_rule(rule_name);
        if removed.is_none() {
            return Err(ClientError::NotFound(format!(
                "rule '{rule_name}' in '{policy_name}'"
            )));
        }

        state.calls.push(ClientCall::Delete {
            policy: policy_name.to_string(),
            rule: rule_name.to_string(),
        });
        state.mutation_succeeded();
        Ok(())
    }

    async fn list_policies(&self) -> ClientResult<Vec<String>> {
        let mut state = self.state();
        state.calls.push(ClientCall::List);
        Ok(state.policies.keys().cloned().collect())
    }
}

#[async_trait]
impl PolicyLifecycle for MemoryClient {
    async fn create_policy(&self, policy_name: &str) -> ClientResult<()> {
        let mut state = self.state();
        state.calls.push(ClientCall::CreatePolicy(policy_name.to_string()));
        if state.policies.contains_key(policy_name) {
            return Err(ClientError::Conflict(format!(
                "policy '{policy_name}' already exists"
            )));
        }
        state
            .policies
            .insert(policy_name.to_string(), SecurityPolicy::new(policy_name));
        Ok(())
    }

    async fn delete_policy(&self, policy_name: &str) -> ClientResult<()> {
        let mut state = self.state();
        state.calls.push(ClientCall::DeletePolicy(policy_name.to_string()));
        state
            .policies
            .remove(policy_name)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("policy '{policy_name}'")))
    }
}
