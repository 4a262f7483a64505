/// Pre-flight verification of policy files
///
/// Runs every local check (field validation, uniqueness, conflict detection)
/// without contacting a store, so a policy can be checked before it is
/// planned or applied.
use crate::core::conflicts::detect_conflicts;
use crate::core::error::Result;
use crate::core::policy::{SecurityPolicy, validate_policy};
use std::path::Path;
use tracing::{info, warn};

/// Result of a policy verification
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub success: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Creates a successful verification result
    pub fn success() -> Self {
        Self {
            success: true,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Creates a failed verification result with errors
    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            warnings: Vec::new(),
            errors,
        }
    }
}

/// Verifies a policy. In strict mode conflict warnings fail the check.
pub fn verify_policy(policy: &SecurityPolicy, strict: bool) -> VerifyResult {
    let mut result = match validate_policy(policy) {
        Ok(()) => VerifyResult::success(),
        Err(errors) => VerifyResult::failure(errors.iter().map(ToString::to_string).collect()),
    };

    result.warnings = detect_conflicts(policy)
        .iter()
        .map(ToString::to_string)
        .collect();

    if strict && !result.warnings.is_empty() {
        result.success = false;
    }

    if result.success {
        info!(
            "Policy '{}' passed verification ({} warning(s))",
            policy.name,
            result.warnings.len()
        );
    } else {
        warn!(
            "Policy '{}' failed verification: {} error(s), {} warning(s)",
            policy.name,
            result.errors.len(),
            result.warnings.len()
        );
    }

    result
}

/// Reads a policy JSON file.
///
/// # Errors
///
/// Returns `Err` if the file cannot be read or is not a policy document.
pub async fn load_policy_file(path: &Path) -> Result<SecurityPolicy> {
    let json = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}

/// Reads and verifies a policy file.
///
/// # Errors
///
/// Returns `Err` only if the file cannot be loaded; policy problems are
/// reported in the [`VerifyResult`].
pub async fn verify_file(path: &Path, strict: bool) -> Result<(SecurityPolicy, VerifyResult)> {
    let policy = load_policy_file(path).await?;
    let result = verify_policy(&policy, strict);
    Ok((policy, result))
}
