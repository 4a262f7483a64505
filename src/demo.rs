//! Walkthrough of a two-tier network's security groups
//!
//! Creates a front-end group (SSH and HTTP in) and a back-end group (SQL in
//! from the front-end subnet only, no outbound traffic), lists the groups,
//! opens FTP on the front end, prints both groups and tears them down again.
//! Teardown of the groups it created runs even when a later step fails.

use crate::audit::{AuditLog, EventType};
use crate::core::client::PolicyLifecycle;
use crate::core::error::Result;
use crate::core::policy::{Access, Direction, Protocol, SecurityPolicy, SecurityRule};
use crate::core::reconciler::Reconciler;
use crate::core::render::render_policy;
use std::fmt::Write;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const FRONT_END: &str = "demo-frontend-nsg";
pub const BACK_END: &str = "demo-backend-nsg";

/// Subnet the front-end hosts live in
pub const FRONT_END_SUBNET: &str = "172.16.1.0/24";

/// Front-end group: SSH and HTTP from anywhere.
///
/// # Errors
///
/// Never fails for the built-in rules; the `Result` comes from validation.
pub fn front_end_policy() -> Result<SecurityPolicy> {
    Ok(SecurityPolicy::from_rules(
        FRONT_END,
        [
            SecurityRule::new("ALLOW-SSH", Direction::Inbound, Access::Allow, 100)
                .with_description("Allow SSH")
                .with_protocol(Protocol::Tcp)
                .with_destination("*", "22"),
            SecurityRule::new("ALLOW-HTTP", Direction::Inbound, Access::Allow, 101)
                .with_description("Allow HTTP")
                .with_protocol(Protocol::Tcp)
                .with_destination("*", "80"),
        ],
    )?)
}

/// Back-end group: SQL only from the front-end subnet, all outbound denied.
///
/// # Errors
///
/// Never fails for the built-in rules; the `Result` comes from validation.
pub fn back_end_policy() -> Result<SecurityPolicy> {
    Ok(SecurityPolicy::from_rules(
        BACK_END,
        [
            SecurityRule::new("ALLOW-SQL", Direction::Inbound, Access::Allow, 100)
                .with_description("Allow SQL")
                .with_protocol(Protocol::Tcp)
                .with_source(FRONT_END_SUBNET, "*")
                .with_destination("*", "1433"),
            SecurityRule::new("DENY-WEB", Direction::Outbound, Access::Deny, 200)
                .with_description("Deny Web"),
        ],
    )?)
}

/// The FTP rule added to the front end in the update step
pub fn allow_ftp() -> SecurityRule {
    SecurityRule::new("ALLOW-FTP", Direction::Inbound, Access::Allow, 200)
        .with_description("Allow FTP")
        .with_protocol(Protocol::Tcp)
        .with_destination("*", "20,21")
}

/// Creates a policy, auditing the attempt with its own outcome.
async fn create<C: PolicyLifecycle>(
    client: &C,
    audit: Option<&AuditLog>,
    name: &'static str,
    created: &mut Vec<&'static str>,
) -> Result<()> {
    let result = client.create_policy(name).await;
    if let Some(audit) = audit {
        let error = result.as_ref().err().map(ToString::to_string);
        audit.log_lifecycle(EventType::CreatePolicy, name, error).await;
    }
    result?;
    created.push(name);
    Ok(())
}

async fn scenario<C: PolicyLifecycle>(
    reconciler: &Reconciler<C>,
    cancel: &CancellationToken,
    audit: Option<&AuditLog>,
    created: &mut Vec<&'static str>,
    out: &mut String,
) -> Result<()> {
    let client = reconciler.client();

    let front_end = front_end_policy()?;
    let _ = writeln!(out, "Creating a security group for the front end - allows SSH and HTTP");
    create(client, audit, FRONT_END, created).await?;
    reconciler.reconcile(&front_end, cancel).await?;
    let _ = writeln!(out, "{}", render_policy(&client.fetch(FRONT_END).await?));

    let back_end = back_end_policy()?;
    let _ = writeln!(
        out,
        "Creating a security group for the back end - allows SQL from {FRONT_END_SUBNET} and denies all outbound traffic"
    );
    create(client, audit, BACK_END, created).await?;
    reconciler.reconcile(&back_end, cancel).await?;
    let _ = writeln!(out, "{}", render_policy(&client.fetch(BACK_END).await?));

    let _ = writeln!(out, "Listing security groups");
    for name in client.list_policies().await? {
        let _ = writeln!(out, "  {name}");
    }

    let _ = writeln!(out, "Updating the front end security group to allow FTP");
    let updated = front_end.add_rule(allow_ftp())?;
    let outcome = reconciler.reconcile(&updated, cancel).await?;
    let _ = writeln!(
        out,
        "Updated the front end security group ({} change(s))",
        outcome.report.applied_count()
    );

    for name in [FRONT_END, BACK_END] {
        let _ = writeln!(out, "{}", render_policy(&client.fetch(name).await?));
    }
    Ok(())
}

/// Runs the walkthrough and returns its transcript.
///
/// Groups the walkthrough created are deleted again at the end. With an
/// audit log, every create and delete attempt is recorded with its own
/// outcome.
///
/// # Errors
///
/// Returns the first failing step's error, after teardown has run.
pub async fn run_demo<C: PolicyLifecycle>(
    reconciler: &Reconciler<C>,
    cancel: &CancellationToken,
    audit: Option<&AuditLog>,
) -> Result<String> {
    info!("Starting demo against the configured store");
    let mut out = String::new();
    let mut created = Vec::new();
    let result = scenario(reconciler, cancel, audit, &mut created, &mut out).await;

    let _ = writeln!(out, "Deleting security groups");
    for name in created {
        let deleted = reconciler.client().delete_policy(name).await;
        match &deleted {
            Ok(()) => {
                let _ = writeln!(out, "  deleted {name}");
            }
            Err(e) => warn!("Demo teardown of '{name}' failed: {e}"),
        }
        if let Some(audit) = audit {
            let error = deleted.err().map(|e| e.to_string());
            audit.log_lifecycle(EventType::DeletePolicy, name, error).await;
        }
    }

    result.map(|()| out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conflicts::detect_conflicts;
    use crate::core::memory::MemoryClient;
    use crate::core::plan::PlanOptions;

    #[test]
    fn test_demo_policies_are_conflict_free() {
        assert!(detect_conflicts(&front_end_policy().unwrap()).is_empty());
        assert!(detect_conflicts(&back_end_policy().unwrap()).is_empty());
        let with_ftp = front_end_policy().unwrap().add_rule(allow_ftp()).unwrap();
        assert!(detect_conflicts(&with_ftp).is_empty());
    }

    #[tokio::test]
    async fn test_demo_runs_and_cleans_up() {
        let reconciler = Reconciler::new(MemoryClient::new(), PlanOptions::additive());
        let transcript = run_demo(&reconciler, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(transcript.contains("ALLOW-FTP"));
        assert!(transcript.contains("20,21"));
        assert!(transcript.contains("Updated the front end security group (1 change(s))"));
        assert!(reconciler.client().policy(FRONT_END).is_none());
        assert!(reconciler.client().policy(BACK_END).is_none());
    }

    #[tokio::test]
    async fn test_demo_tears_down_after_failure() {
        let client = MemoryClient::new();
        // Fail the first back-end write
        client.fail_mutation(2, crate::core::error::ClientError::Transient("busy".into()));
        let reconciler = Reconciler::new(client, PlanOptions::additive());

        assert!(run_demo(&reconciler, &CancellationToken::new(), None).await.is_err());
        assert!(reconciler.client().policy(FRONT_END).is_none());
        assert!(reconciler.client().policy(BACK_END).is_none());
    }

    #[tokio::test]
    async fn test_demo_audits_only_steps_that_ran() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));

        // The front end already exists, so the walkthrough stops at its first step
        let client = MemoryClient::new();
        client.create_policy(FRONT_END).await.unwrap();
        let reconciler = Reconciler::new(client, PlanOptions::additive());

        let err = run_demo(&reconciler, &CancellationToken::new(), Some(&audit)).await;
        assert!(err.is_err());
        // Not ours to tear down
        assert!(reconciler.client().policy(FRONT_END).is_some());

        let events = audit.read_recent(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::CreatePolicy);
        assert_eq!(events[0].policy, FRONT_END);
        assert!(!events[0].success);
    }

    #[tokio::test]
    async fn test_demo_audits_each_lifecycle_step() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));
        let reconciler = Reconciler::new(MemoryClient::new(), PlanOptions::additive());

        run_demo(&reconciler, &CancellationToken::new(), Some(&audit))
            .await
            .unwrap();

        // Newest first
        let events = audit.read_recent(10).await.unwrap();
        let steps: Vec<(EventType, &str, bool)> = events
            .iter()
            .map(|e| (e.event_type.clone(), e.policy.as_str(), e.success))
            .collect();
        assert_eq!(
            steps,
            vec![
                (EventType::DeletePolicy, BACK_END, true),
                (EventType::DeletePolicy, FRONT_END, true),
                (EventType::CreatePolicy, BACK_END, true),
                (EventType::CreatePolicy, FRONT_END, true),
            ]
        );
    }
}
