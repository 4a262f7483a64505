//! Fetch, plan and apply under a per-policy lock

use crate::core::apply::{ApplyReport, apply};
use crate::core::client::ResourceClient;
use crate::core::conflicts::ConflictWarning;
use crate::core::error::{ClientError, Error, Result};
use crate::core::lock::PolicyLocks;
use crate::core::plan::{PlanOptions, ReconciliationPlan, plan};
use crate::core::policy::SecurityPolicy;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Counts of a plan, kept after the plan itself is consumed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub plan_id: Uuid,
    pub policy_name: String,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub warnings: Vec<ConflictWarning>,
}

impl From<&ReconciliationPlan> for PlanSummary {
    fn from(plan: &ReconciliationPlan) -> Self {
        Self {
            plan_id: plan.id,
            policy_name: plan.policy_name.clone(),
            added: plan.to_add.len(),
            updated: plan.to_update.len(),
            removed: plan.to_remove.len(),
            warnings: plan.warnings.clone(),
        }
    }
}

/// Result of a successful [`Reconciler::reconcile`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub summary: PlanSummary,
    pub report: ApplyReport,
}

impl ReconcileOutcome {
    /// `true` when the remote already matched
    pub fn was_noop(&self) -> bool {
        self.report.succeeded.is_empty() && self.report.not_applied.is_empty()
    }
}

/// Owns a client and reconciles policies against it
pub struct Reconciler<C> {
    client: C,
    options: PlanOptions,
    locks: PolicyLocks,
}

impl<C: ResourceClient> Reconciler<C> {
    pub fn new(client: C, options: PlanOptions) -> Self {
        Self {
            client,
            options,
            locks: PolicyLocks::new(),
        }
    }

    /// Shares an existing lock registry, so several reconcilers over the same
    /// store serialise with each other.
    pub fn with_locks(mut self, locks: PolicyLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn options(&self) -> PlanOptions {
        self.options
    }

    /// Reads the remote policy; a missing policy is treated as empty.
    ///
    /// # Errors
    ///
    /// Propagates any client error other than `NotFound`.
    pub async fn observe(&self, policy_name: &str) -> Result<SecurityPolicy> {
        match self.client.fetch(policy_name).await {
            Ok(policy) => Ok(policy),
            Err(ClientError::NotFound(_)) => {
                info!("Policy '{policy_name}' does not exist yet; planning from empty");
                Ok(SecurityPolicy::new(policy_name))
            }
            Err(err) => Err(Error::Client(err)),
        }
    }

    /// Computes the plan for `desired` without applying it.
    ///
    /// # Errors
    ///
    /// Fails on client errors while fetching and on validation errors.
    pub async fn preview(&self, desired: &SecurityPolicy) -> Result<ReconciliationPlan> {
        let observed = self.observe(&desired.name).await?;
        Ok(plan(desired, &observed, &self.options)?)
    }

    /// Brings the remote policy in line with `desired`.
    ///
    /// Holds the lock for `desired.name` from fetch to the last write.
    ///
    /// # Errors
    ///
    /// Fails on client errors while fetching, validation errors, and
    /// [`ApplyError`](crate::core::error::ApplyError)s.
    pub async fn reconcile(
        &self,
        desired: &SecurityPolicy,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let _guard = self.locks.lock(&desired.name).await;

        let plan = self.preview(desired).await?;
        let summary = PlanSummary::from(&plan);
        let report = apply(plan, &self.client, cancel).await?;

        Ok(ReconcileOutcome { summary, report })
    }
}
