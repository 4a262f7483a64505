//! Resource client abstraction
//!
//! A [`ResourceClient`] is the only component that talks to the store holding
//! remote security groups. Planning never calls it; the apply engine and the
//! reconciler do. Implementations ship for a local directory
//! ([`FileStore`](crate::core::store::FileStore)) and for tests
//! ([`MemoryClient`](crate::core::memory::MemoryClient)).

use crate::core::error::ClientError;
use crate::core::policy::SecurityPolicy;
use crate::core::policy::SecurityRule;
use async_trait::async_trait;

/// Result type for resource client calls
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Access to remote security groups
///
/// Writes are rule-granular so a failed apply leaves a well-defined prefix of
/// the plan in place. Implementations must reject an upsert that would put two
/// rules in the same `(direction, priority)` slot with
/// [`ClientError::Conflict`].
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Reads the current state of a policy.
    ///
    /// Returns [`ClientError::NotFound`] if the policy does not exist.
    async fn fetch(&self, policy_name: &str) -> ClientResult<SecurityPolicy>;

    /// Creates or replaces the rule with the same name, creating the policy
    /// if it does not exist yet.
    async fn upsert_rule(&self, policy_name: &str, rule: &SecurityRule) -> ClientResult<()>;

    /// Deletes a rule by name.
    ///
    /// Returns [`ClientError::NotFound`] if the rule is absent.
    async fn delete_rule(&self, policy_name: &str, rule_name: &str) -> ClientResult<()>;

    /// Lists the names of all policies, sorted.
    async fn list_policies(&self) -> ClientResult<Vec<String>>;
}

/// Creating and tearing down whole policies
///
/// Reconciliation never needs this (an upsert into a missing policy creates
/// it); the demo and the CLI do.
#[async_trait]
pub trait PolicyLifecycle: ResourceClient {
    /// Creates an empty policy.
    ///
    /// Returns [`ClientError::Conflict`] if it already exists.
    async fn create_policy(&self, policy_name: &str) -> ClientResult<()>;

    /// Deletes a policy and all of its rules.
    ///
    /// Returns [`ClientError::NotFound`] if it does not exist.
    async fn delete_policy(&self, policy_name: &str) -> ClientResult<()>;
}
