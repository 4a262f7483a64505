//! Plan application
//!
//! Executes the operations of a [`ReconciliationPlan`] one at a time against a
//! [`ResourceClient`], in the order given by
//! [`ReconciliationPlan::operations`]. There is no transaction: a failure
//! leaves the already applied prefix in place and the returned
//! [`ApplyError`] describes exactly which operations ran.
//!
//! Cancellation is cooperative and observed between operations; an in-flight
//! client call always completes. No retries are performed here.

use crate::core::client::ResourceClient;
use crate::core::error::{ApplyError, ClientError};
use crate::core::plan::{PlannedOperation, ReconciliationPlan};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What an apply did and did not do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub plan_id: Uuid,
    pub policy_name: String,
    /// Operations that completed, in execution order
    pub succeeded: Vec<PlannedOperation>,
    /// Operations never attempted (the failing one included)
    pub not_applied: Vec<PlannedOperation>,
}

impl ApplyReport {
    fn new(plan: &ReconciliationPlan) -> Self {
        Self {
            plan_id: plan.id,
            policy_name: plan.policy_name.clone(),
            succeeded: Vec::new(),
            not_applied: Vec::new(),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn is_complete(&self) -> bool {
        self.not_applied.is_empty()
    }
}

async fn execute<C: ResourceClient + ?Sized>(
    client: &C,
    policy_name: &str,
    operation: &PlannedOperation,
) -> Result<(), ClientError> {
    match operation {
        PlannedOperation::Upsert { rule, .. } => client.upsert_rule(policy_name, rule).await,
        PlannedOperation::Delete { rule } => {
            match client.delete_rule(policy_name, &rule.name).await {
                // Already gone is the state we wanted
                Err(ClientError::NotFound(what)) => {
                    warn!("Rule '{}' was already absent: {what}", rule.name);
                    Ok(())
                }
                other => other,
            }
        }
    }
}

/// Applies a plan, consuming it.
///
/// # Errors
///
/// - [`ApplyError::Transient`] if the first operation fails transiently
///   (nothing was applied and the whole plan is safe to retry)
/// - [`ApplyError::PartialFailure`] for any other failing operation
/// - [`ApplyError::Cancelled`] if `cancel` fires before an operation starts
pub async fn apply<C: ResourceClient + ?Sized>(
    plan: ReconciliationPlan,
    client: &C,
    cancel: &CancellationToken,
) -> Result<ApplyReport, ApplyError> {
    let operations = plan.operations();
    let mut report = ApplyReport::new(&plan);

    info!(
        "Applying plan {} to '{}' ({} operation(s))",
        plan.id,
        plan.policy_name,
        operations.len()
    );

    let mut pending = operations.into_iter().enumerate();
    while let Some((index, operation)) = pending.next() {
        if cancel.is_cancelled() {
            report.not_applied.push(operation);
            report.not_applied.extend(pending.map(|(_, op)| op));
            warn!(
                "Apply of '{}' cancelled after {} operation(s)",
                report.policy_name,
                report.applied_count()
            );
            return Err(ApplyError::Cancelled { report });
        }

        debug!("[{index}] {operation}");
        match execute(client, &plan.policy_name, &operation).await {
            Ok(()) => report.succeeded.push(operation),
            Err(cause) if index == 0 && cause.is_transient() => {
                error!("Apply of '{}' failed before any change: {cause}", plan.policy_name);
                return Err(ApplyError::Transient(cause));
            }
            Err(cause) => {
                error!(
                    "Apply of '{}' failed at operation {index} ({operation}): {cause}",
                    plan.policy_name
                );
                report.not_applied.push(operation.clone());
                report.not_applied.extend(pending.map(|(_, op)| op));
                return Err(ApplyError::PartialFailure {
                    index,
                    operation,
                    cause,
                    report,
                });
            }
        }
    }

    info!(
        "Applied plan {} to '{}': {} change(s)",
        plan.id,
        plan.policy_name,
        report.applied_count()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryClient;
    use crate::core::plan::{PlanOptions, plan};
    use crate::core::policy::SecurityPolicy;
    use crate::core::test_helpers::{allow_tcp, front_end};

    fn front_end_plan() -> ReconciliationPlan {
        plan(
            &front_end()
                .add_rule(allow_tcp("ALLOW-FTP", 200, "20,21"))
                .unwrap(),
            &SecurityPolicy::new("fe"),
            &PlanOptions::additive(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_runs_every_operation() {
        let client = MemoryClient::new().with_policy(SecurityPolicy::new("fe"));
        let report = apply(front_end_plan(), &client, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.applied_count(), 3);
        assert!(report.is_complete());
        assert_eq!(client.policy("fe").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_first_transient_failure_applies_nothing() {
        let client = MemoryClient::new().with_policy(SecurityPolicy::new("fe"));
        client.fail_mutation(0, ClientError::Transient("throttled".into()));

        let err = apply(front_end_plan(), &client, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Transient(_)));
        assert!(client.policy("fe").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_reports_prefix() {
        let client = MemoryClient::new().with_policy(SecurityPolicy::new("fe"));
        client.fail_mutation(1, ClientError::Transient("throttled".into()));

        let err = apply(front_end_plan(), &client, &CancellationToken::new())
            .await
            .unwrap_err();
        let ApplyError::PartialFailure {
            index,
            operation,
            report,
            ..
        } = err
        else {
            panic!("expected partial failure, got {err:?}");
        };
        assert_eq!(index, 1);
        assert_eq!(operation.rule_name(), "ALLOW-HTTP");
        assert_eq!(operation.priority(), 101);
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.not_applied.len(), 2);
        assert!(client.policy("fe").unwrap().contains("ALLOW-SSH"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let client = MemoryClient::new().with_policy(SecurityPolicy::new("fe"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = apply(front_end_plan(), &client, &cancel).await.unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.applied_count(), 0);
        assert_eq!(report.not_applied.len(), 3);
        assert!(client.policy("fe").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_operations() {
        let client = MemoryClient::new().with_policy(SecurityPolicy::new("fe"));
        let cancel = CancellationToken::new();
        client.cancel_after(2, cancel.clone());

        let err = apply(front_end_plan(), &client, &cancel).await.unwrap_err();
        assert!(matches!(err, ApplyError::Cancelled { .. }));
        assert_eq!(err.report().unwrap().applied_count(), 2);
        assert_eq!(client.policy("fe").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_of_missing_rule_counts_as_done() {
        let observed = front_end();
        let desired = observed.without_rule("ALLOW-HTTP");
        let plan = plan(&desired, &observed, &PlanOptions::exclusive()).unwrap();

        // Remote no longer has the rule
        let client = MemoryClient::new().with_policy(desired);
        let report = apply(plan, &client, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.applied_count(), 1);
    }
}
