//! Integration tests for secgroup
//!
//! These tests drive the public API end to end: policy files on disk, the
//! file-backed store in a temporary directory, planning, applying, partial
//! failure recovery and the demo walkthrough.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use secgroup::core::memory::MemoryClient;
use secgroup::core::store::FileStore;
use secgroup::core::verify::verify_file;
use secgroup::demo::{BACK_END, FRONT_END, run_demo};
use secgroup::{
    Access, ApplyError, ClientError, ConflictKind, Direction, Error, PlanOptions, PolicyLifecycle,
    Protocol, Reconciler, ResourceClient, SecurityPolicy, SecurityRule, ValidationError,
    detect_conflicts,
};
use tokio_util::sync::CancellationToken;

fn allow_tcp(name: &str, priority: u32, port: &str) -> SecurityRule {
    SecurityRule::new(name, Direction::Inbound, Access::Allow, priority)
        .with_protocol(Protocol::Tcp)
        .with_destination("*", port)
}

fn web_policy() -> SecurityPolicy {
    SecurityPolicy::from_rules(
        "web",
        [
            allow_tcp("ALLOW-SSH", 100, "22"),
            allow_tcp("ALLOW-HTTP", 110, "80"),
            allow_tcp("ALLOW-HTTPS", 120, "443"),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_file_store_round_trip_through_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).await.unwrap();
    let reconciler = Reconciler::new(store, PlanOptions::additive());
    let cancel = CancellationToken::new();

    let outcome = reconciler.reconcile(&web_policy(), &cancel).await.unwrap();
    assert_eq!(outcome.summary.added, 3);
    assert_eq!(outcome.report.applied_count(), 3);

    // A fresh handle on the same directory sees the applied policy
    let reopened = FileStore::open(dir.path()).await.unwrap();
    assert_eq!(reopened.fetch("web").await.unwrap(), web_policy());
    assert_eq!(reopened.list_policies().await.unwrap(), vec!["web".to_string()]);

    let again = reconciler.reconcile(&web_policy(), &cancel).await.unwrap();
    assert!(again.was_noop());
}

#[tokio::test]
async fn test_changed_rule_is_updated_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::new(
        FileStore::open(dir.path()).await.unwrap(),
        PlanOptions::additive(),
    );
    let cancel = CancellationToken::new();
    reconciler.reconcile(&web_policy(), &cancel).await.unwrap();

    let narrowed = web_policy()
        .without_rule("ALLOW-SSH")
        .add_rule(allow_tcp("ALLOW-SSH", 100, "22").with_source("10.0.0.0/8", "*"))
        .unwrap();
    let outcome = reconciler.reconcile(&narrowed, &cancel).await.unwrap();

    assert_eq!(outcome.summary.updated, 1);
    assert_eq!(outcome.summary.added, 0);
    let stored = reconciler.client().fetch("web").await.unwrap();
    assert_eq!(
        stored.get("ALLOW-SSH").unwrap().source_address_prefix,
        "10.0.0.0/8"
    );
}

#[tokio::test]
async fn test_renumbered_rules_converge_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::new(
        FileStore::open(dir.path()).await.unwrap(),
        PlanOptions::exclusive(),
    );
    let cancel = CancellationToken::new();
    reconciler.reconcile(&web_policy(), &cancel).await.unwrap();

    // SSH and HTTP trade slots while a new rule takes HTTPS's old slot
    let renumbered = SecurityPolicy::from_rules(
        "web",
        [
            allow_tcp("ALLOW-SSH", 110, "22"),
            allow_tcp("ALLOW-HTTP", 100, "80"),
            allow_tcp("ALLOW-HTTPS", 130, "443"),
            allow_tcp("ALLOW-RDP", 120, "3389"),
        ],
    )
    .unwrap();
    let outcome = reconciler.reconcile(&renumbered, &cancel).await.unwrap();
    assert_eq!(outcome.summary.added, 1);
    assert_eq!(outcome.summary.updated, 3);

    let stored = FileStore::open(dir.path()).await.unwrap().fetch("web").await.unwrap();
    assert_eq!(stored.len(), 4);
    for rule in renumbered.rules() {
        assert_eq!(stored.get(&rule.name), Some(rule));
    }
    assert!(reconciler.reconcile(&renumbered, &cancel).await.unwrap().was_noop());
}

#[tokio::test]
async fn test_additive_keeps_and_exclusive_prunes_unmanaged_rules() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).await.unwrap();
    store
        .upsert_rule("web", &allow_tcp("LEGACY-TELNET", 300, "23"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let additive = Reconciler::new(store, PlanOptions::additive());
    additive.reconcile(&web_policy(), &cancel).await.unwrap();
    assert!(additive.client().fetch("web").await.unwrap().contains("LEGACY-TELNET"));

    let store = FileStore::open(dir.path()).await.unwrap();
    let exclusive = Reconciler::new(store, PlanOptions::exclusive());
    let outcome = exclusive.reconcile(&web_policy(), &cancel).await.unwrap();

    assert_eq!(outcome.summary.removed, 1);
    assert_eq!(exclusive.client().fetch("web").await.unwrap(), web_policy());
}

#[tokio::test]
async fn test_partial_failure_reports_progress_and_retry_converges() {
    let client = MemoryClient::new();
    client.fail_mutation(1, ClientError::Transient("throttled".into()));
    let reconciler = Reconciler::new(client, PlanOptions::additive());
    let cancel = CancellationToken::new();

    let err = reconciler
        .reconcile(&web_policy(), &cancel)
        .await
        .unwrap_err();
    match err {
        Error::Apply(ApplyError::PartialFailure {
            index,
            cause,
            report,
            ..
        }) => {
            assert_eq!(index, 1);
            assert!(cause.is_transient());
            assert_eq!(report.applied_count(), 1);
            assert_eq!(report.not_applied.len(), 2);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }

    let outcome = reconciler.reconcile(&web_policy(), &cancel).await.unwrap();
    assert_eq!(outcome.report.applied_count(), 2);
    assert_eq!(reconciler.client().policy("web").unwrap(), web_policy());
}

#[tokio::test]
async fn test_cancelled_apply_stops_between_operations() {
    let client = MemoryClient::new();
    let cancel = CancellationToken::new();
    client.cancel_after(2, cancel.clone());
    let reconciler = Reconciler::new(client, PlanOptions::additive());

    let err = reconciler
        .reconcile(&web_policy(), &cancel)
        .await
        .unwrap_err();
    let Error::Apply(ApplyError::Cancelled { report }) = err else {
        panic!("expected cancellation, got {err:?}");
    };
    assert_eq!(report.applied_count(), 2);
    assert_eq!(reconciler.client().policy("web").unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_policy_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::new(
        FileStore::open(dir.path()).await.unwrap(),
        PlanOptions::additive(),
    );

    // Built by deserializing so construction-time validation is bypassed
    let desired: SecurityPolicy = serde_json::from_value(serde_json::json!({
        "name": "web",
        "rules": [
            {"name": "A", "direction": "Inbound", "access": "Allow", "protocol": "Tcp",
             "destinationPortRange": "22", "priority": 100},
            {"name": "B", "direction": "Inbound", "access": "Allow", "protocol": "Tcp",
             "destinationPortRange": "80", "priority": 100},
            {"name": "C", "direction": "Inbound", "access": "Allow", "protocol": "Tcp",
             "destinationPortRange": "99999", "priority": 5000}
        ]
    }))
    .unwrap();

    let err = reconciler
        .reconcile(&desired, &CancellationToken::new())
        .await
        .unwrap_err();
    let Error::Validation(errors) = err else {
        panic!("expected validation errors, got {err:?}");
    };
    assert!(errors.len() >= 3);
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicatePriority { .. }))
    );
    assert!(reconciler.client().list_policies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_check_reports_shadowed_rule_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backend.json");
    let policy = SecurityPolicy::from_rules(
        "backend",
        [
            SecurityRule::new("DENY-WEB", Direction::Outbound, Access::Deny, 200),
            SecurityRule::new("ALLOW-HTTPS", Direction::Outbound, Access::Allow, 300)
                .with_protocol(Protocol::Tcp)
                .with_destination("*", "443"),
        ],
    )
    .unwrap();
    tokio::fs::write(&path, serde_json::to_string_pretty(&policy).unwrap())
        .await
        .unwrap();

    let warnings = detect_conflicts(&policy);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, ConflictKind::Shadowed);
    assert_eq!(warnings[0].covered_by, vec!["DENY-WEB".to_string()]);

    let (loaded, lenient) = verify_file(&path, false).await.unwrap();
    assert_eq!(loaded, policy);
    assert!(lenient.success);
    assert_eq!(lenient.warnings.len(), 1);

    let (_, strict) = verify_file(&path, true).await.unwrap();
    assert!(!strict.success);
}

#[tokio::test]
async fn test_missing_policy_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = verify_file(&dir.path().join("absent.json"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[tokio::test]
async fn test_demo_against_file_store_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::new(
        FileStore::open(dir.path()).await.unwrap(),
        PlanOptions::additive(),
    );

    let transcript = run_demo(&reconciler, &CancellationToken::new(), None)
        .await
        .unwrap();

    assert!(transcript.contains(FRONT_END));
    assert!(transcript.contains(BACK_END));
    assert!(transcript.contains("ALLOW-FTP"));
    assert!(reconciler.client().list_policies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_policy_lifecycle_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).await.unwrap();

    store.create_policy("web").await.unwrap();
    assert!(matches!(
        store.create_policy("web").await,
        Err(ClientError::Conflict(_))
    ));
    assert!(store.fetch("web").await.unwrap().is_empty());

    store.delete_policy("web").await.unwrap();
    assert!(matches!(
        store.delete_policy("web").await,
        Err(ClientError::NotFound(_))
    ));
}
