/// Audit logging for security-critical operations
///
/// This module provides structured logging of every change made to a policy
/// store: plan applications (complete, partial or cancelled), verification
/// runs, and policy creation and teardown.
use crate::core::apply::ApplyReport;
use crate::core::error::ApplyError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ApplyPlan,
    VerifyPolicy,
    CreatePolicy,
    DeletePolicy,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Policy the event refers to
    pub policy: String,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        policy: impl Into<String>,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            policy: policy.into(),
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Creates an audit log writing to `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Writes an event, logging instead of failing on I/O errors
    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(event).await {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Arguments
    ///
    /// * `count` - Maximum number of events to return
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    /// Returns the path to the audit log file
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Logs the outcome of applying a plan
    pub async fn log_apply(
        &self,
        policy: &str,
        plan_id: Uuid,
        result: Result<&ApplyReport, &ApplyError>,
    ) {
        let (success, report, error) = match result {
            Ok(report) => (true, Some(report), None),
            Err(err) => (false, err.report(), Some(err.to_string())),
        };

        let details = serde_json::json!({
            "plan_id": plan_id,
            "applied": report.map_or(0, ApplyReport::applied_count),
            "not_applied": report.map_or(0, |r| r.not_applied.len()),
            "operations": report
                .map(|r| r.succeeded.iter().map(ToString::to_string).collect::<Vec<_>>())
                .unwrap_or_default(),
        });

        self.record(AuditEvent::new(
            EventType::ApplyPlan,
            policy,
            success,
            details,
            error,
        ))
        .await;
    }

    /// Logs a verification run
    pub async fn log_verify(&self, policy: &str, success: bool, error_count: usize, warning_count: usize) {
        self.record(AuditEvent::new(
            EventType::VerifyPolicy,
            policy,
            success,
            serde_json::json!({
                "error_count": error_count,
                "warning_count": warning_count,
            }),
            None,
        ))
        .await;
    }

    /// Logs the creation or teardown of a whole policy
    pub async fn log_lifecycle(&self, event_type: EventType, policy: &str, error: Option<String>) {
        self.record(AuditEvent::new(
            event_type,
            policy,
            error.is_none(),
            serde_json::json!({}),
            error,
        ))
        .await;
    }
}
