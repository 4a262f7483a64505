use crate::core::apply::ApplyReport;
use crate::core::conflicts::ConflictWarning;
use crate::core::plan::PlannedOperation;
use crate::core::policy::{Direction, MAX_PRIORITY, MIN_PRIORITY, RuleField};
use std::fmt;
use thiserror::Error;

/// Core error types for secgroup
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Policy failed local validation
    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    /// Resource client call failed outside of an apply
    #[error("Resource client error: {0}")]
    Client(#[from] ClientError),

    /// Applying a plan failed or was cancelled
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A local, pre-flight problem with a rule or policy
///
/// Never involves the resource client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Rule '{rule}': invalid name: {message}")]
    InvalidName { rule: String, message: String },

    #[error("Rule '{rule}': priority {priority} outside {}..={}", MIN_PRIORITY, MAX_PRIORITY)]
    InvalidPriority { rule: String, priority: u32 },

    #[error("Rule '{rule}': invalid {field} '{value}': {message}")]
    InvalidPortRange {
        rule: String,
        field: RuleField,
        value: String,
        message: String,
    },

    #[error("Rule '{rule}': invalid {field} '{value}': {message}")]
    InvalidAddressPrefix {
        rule: String,
        field: RuleField,
        value: String,
        message: String,
    },

    #[error("Rule '{rule}': {direction} priority {priority} already used by '{existing}'")]
    DuplicatePriority {
        rule: String,
        existing: String,
        direction: Direction,
        priority: u32,
    },

    #[error("Rule '{rule}': a rule with this name already exists")]
    DuplicateName { rule: String },

    /// No priority is free to park a rule that trades slots with others
    #[error("Rule '{rule}': no free {direction} priority to reorder through")]
    NoFreePriority { rule: String, direction: Direction },

    #[error("Policy has {count} rules (max: {max})")]
    TooManyRules { count: usize, max: usize },

    /// A conflict warning promoted to an error in strict mode
    #[error("{0}")]
    Conflict(ConflictWarning),
}

impl ValidationError {
    /// Name of the rule the error refers to, if any
    pub fn rule(&self) -> Option<&str> {
        match self {
            ValidationError::InvalidName { rule, .. }
            | ValidationError::InvalidPriority { rule, .. }
            | ValidationError::InvalidPortRange { rule, .. }
            | ValidationError::InvalidAddressPrefix { rule, .. }
            | ValidationError::DuplicatePriority { rule, .. }
            | ValidationError::DuplicateName { rule }
            | ValidationError::NoFreePriority { rule, .. } => Some(rule),
            ValidationError::Conflict(warning) => Some(&warning.rule),
            ValidationError::TooManyRules { .. } => None,
        }
    }
}

/// Every validation error found in one pass (collect-all, never empty)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    /// `Ok(())` for an empty list, otherwise the collected errors
    pub fn from_vec(errors: Vec<ValidationError>) -> std::result::Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self(errors))
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Errors reported by a [`ResourceClient`](crate::core::client::ResourceClient)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote rejected the write (e.g. a priority already taken)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Temporary failure; retrying later may succeed
    #[error("Transient error: {0}")]
    Transient(String),

    /// Stored state could not be read back
    #[error("Corrupted resource: {0}")]
    Corrupted(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// Failure while applying a plan
///
/// Carries enough context (plan index, rule name, direction, priority) for
/// the caller to decide between retrying the remainder and rolling back.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The first operation failed transiently; nothing was applied
    #[error("Transient failure before any change was applied: {0}")]
    Transient(ClientError),

    /// Operation `index` failed; `report` lists what did and did not apply
    #[error(
        "Apply of '{}' failed at operation {index} ({operation}) after {} change(s): {cause}",
        .report.policy_name,
        .report.applied_count()
    )]
    PartialFailure {
        index: usize,
        operation: PlannedOperation,
        cause: ClientError,
        report: ApplyReport,
    },

    /// Cancellation was observed between operations
    #[error(
        "Apply of '{}' cancelled after {} change(s)",
        .report.policy_name,
        .report.applied_count()
    )]
    Cancelled { report: ApplyReport },
}

impl ApplyError {
    /// Report of the partial apply, when one exists
    pub fn report(&self) -> Option<&ApplyReport> {
        match self {
            ApplyError::Transient(_) => None,
            ApplyError::PartialFailure { report, .. } | ApplyError::Cancelled { report } => {
                Some(report)
            }
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Translates a crate error into a user-facing message with next steps.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Validation(errors) => Self::new(format!(
                "Policy rejected before contacting the store ({} problem(s))",
                errors.len()
            ))
            .with_suggestion("Fix every listed rule; nothing was changed")
            .with_suggestion("Priorities must be unique per direction within 100..=4096"),
            Error::Client(cause) => Self::from_client_error(cause),
            Error::Apply(ApplyError::Transient(cause)) => Self::new(format!(
                "Nothing was applied: {cause}"
            ))
            .with_suggestion("The whole plan is safe to retry"),
            Error::Apply(ApplyError::PartialFailure {
                index,
                operation,
                cause,
                report,
            }) => Self::new(format!(
                "Policy '{}' is partially applied: {} change(s) succeeded, operation {index} ({operation}) failed",
                report.policy_name,
                report.applied_count()
            ))
            .with_suggestion(Self::from_client_error(cause).user_message)
            .with_suggestion("Re-run the same plan: already applied changes will not be repeated")
            .with_suggestion("Or restore the previous policy file to roll back"),
            Error::Apply(ApplyError::Cancelled { report }) => Self::new(format!(
                "Apply cancelled: {} change(s) applied, {} pending",
                report.applied_count(),
                report.not_applied.len()
            ))
            .with_suggestion("Re-run to apply the remaining changes"),
            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
                Self::new(error.to_string())
            }
        }
    }

    /// Translates a resource client error.
    pub fn from_client_error(error: &ClientError) -> Self {
        match error {
            ClientError::NotFound(what) => Self::new(format!("'{what}' does not exist"))
                .with_suggestion("Check the policy name with `secgroup list`"),
            ClientError::Conflict(what) => Self::new(format!("The store rejected the change: {what}"))
                .with_suggestion("Another rule may hold the same direction and priority")
                .with_suggestion("Use --prune to remove unmanaged rules, or pick a free priority"),
            ClientError::Transient(what) => Self::new(format!("Temporary store failure: {what}"))
                .with_suggestion("Retry the operation"),
            ClientError::Corrupted(what) => Self::new(format!("Stored policy is unreadable: {what}"))
                .with_suggestion("Inspect or restore the policy file in the store directory"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
