//! Conflict and overlap detection
//!
//! Finds rules that can never take effect because higher-priority rules in
//! the same direction already match all of their traffic:
//!
//! - **Redundant**: every earlier rule deciding that traffic has the same
//!   access, so removing the rule changes nothing.
//! - **Shadowed**: at least one earlier rule deciding that traffic has the
//!   opposite access, so the rule's intent is silently overridden. The classic
//!   case is a broad early "deny all outbound" above a narrow "allow 443".
//!
//! An earlier rule decides part of the traffic only if it matches some of it
//! before any rule ahead of it does; overlapping rules that are themselves
//! fully covered decide nothing.
//!
//! Warnings are advisory: the provider still evaluates by priority. Rules
//! whose fields do not parse are skipped here; validation reports them.

use crate::core::coverage::MatchPredicate;
use crate::core::policy::{Access, Direction, SecurityPolicy, SecurityRule};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::IntoEnumIterator;
use tracing::{debug, warn};

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::AsRefStr,
)]
pub enum ConflictKind {
    #[strum(serialize = "redundant")]
    Redundant,
    #[strum(serialize = "shadowed")]
    Shadowed,
}

/// An unreachable rule and the earlier rules that decide its traffic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictWarning {
    pub kind: ConflictKind,
    pub rule: String,
    pub direction: Direction,
    pub priority: u32,
    pub access: Access,
    /// Higher-priority rules matching part of this rule's traffic, in
    /// evaluation order
    pub covered_by: Vec<String>,
}

impl fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rule '{}' ({} {}, priority {}) is {} by {}",
            self.rule,
            self.direction,
            self.access,
            self.priority,
            self.kind,
            self.covered_by
                .iter()
                .map(|name| format!("'{name}'"))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// Runs the detector over every direction of a policy.
pub fn detect_conflicts(policy: &SecurityPolicy) -> Vec<ConflictWarning> {
    let mut warnings = Vec::new();
    for direction in Direction::iter() {
        warnings.extend(detect_in_direction(&policy.ordered(direction)));
    }

    for warning in &warnings {
        warn!("Policy '{}': {}", policy.name, warning);
    }
    warnings
}

/// Checks rules of one direction, given in ascending priority order.
fn detect_in_direction(ordered: &[&SecurityRule]) -> Vec<ConflictWarning> {
    let mut warnings = Vec::new();
    let mut earlier: Vec<(&SecurityRule, MatchPredicate)> = Vec::with_capacity(ordered.len());

    for &rule in ordered {
        let Some(predicate) = MatchPredicate::from_rule(rule) else {
            debug!("Skipping unparsable rule '{}' in conflict check", rule.name);
            continue;
        };

        // Only earlier rules that take some of this rule's traffic before
        // anything else does count as deciding it
        if let Some(indices) = predicate.deciders(earlier.iter().map(|(_, p)| p))
            && !indices.is_empty()
        {
            let deciders: Vec<&SecurityRule> = indices.iter().map(|&i| earlier[i].0).collect();
            let kind = if deciders.iter().all(|other| other.access == rule.access) {
                ConflictKind::Redundant
            } else {
                ConflictKind::Shadowed
            };

            warnings.push(ConflictWarning {
                kind,
                rule: rule.name.clone(),
                direction: rule.direction,
                priority: rule.priority,
                access: rule.access,
                covered_by: deciders.iter().map(|other| other.name.clone()).collect(),
            });
        }

        earlier.push((rule, predicate));
    }

    warnings
}
