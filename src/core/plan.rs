//! Reconciliation planning
//!
//! Computes the rule-level changes needed to move an observed (remote)
//! policy to a desired one. Planning is pure: it performs no I/O and can be
//! run as often as needed; only [`apply`](crate::core::apply::apply) talks to
//! a resource client.
//!
//! # Modes
//!
//! - **Additive** (default): rules present remotely but absent from the
//!   desired policy are left alone.
//! - **Exclusive** (`prune_unmanaged`): such rules are removed.
//!
//! # Ordering
//!
//! [`ReconciliationPlan::operations`] yields deletes that free a
//! `(direction, priority)` slot a desired rule needs first, then upserts, then
//! the remaining deletes. Upserts run in priority order, except that a rule
//! moving into a slot an updated rule still holds waits until that rule has
//! moved out. Updated rules that trade slots in a cycle are broken up by
//! parking one of them at a free priority first. No upsert ever targets a slot
//! another rule still holds.

use crate::core::conflicts::{ConflictWarning, detect_conflicts};
use crate::core::error::{ValidationError, ValidationErrors};
use crate::core::policy::{
    Direction, MAX_PRIORITY, MIN_PRIORITY, RuleField, SecurityPolicy, SecurityRule,
    validate_policy,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Caller-selected planning behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    /// Remove remote rules absent from the desired policy
    pub prune_unmanaged: bool,
    /// Treat conflict warnings as validation errors
    pub strict: bool,
}

impl PlanOptions {
    pub fn additive() -> Self {
        Self::default()
    }

    pub fn exclusive() -> Self {
        Self {
            prune_unmanaged: true,
            strict: false,
        }
    }
}

/// A rule whose remote copy differs from the desired one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub observed: SecurityRule,
    pub desired: SecurityRule,
    pub changed: Vec<RuleField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum UpsertKind {
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "update")]
    Update,
    /// Temporary move to a free priority, releasing a slot another rule needs
    #[strum(serialize = "park")]
    Park,
}

/// One remote call of an apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlannedOperation {
    Upsert {
        kind: UpsertKind,
        rule: SecurityRule,
    },
    Delete {
        rule: SecurityRule,
    },
}

impl PlannedOperation {
    pub fn rule(&self) -> &SecurityRule {
        match self {
            PlannedOperation::Upsert { rule, .. } | PlannedOperation::Delete { rule } => rule,
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule().name
    }

    pub fn direction(&self) -> Direction {
        self.rule().direction
    }

    pub fn priority(&self) -> u32 {
        self.rule().priority
    }
}

impl fmt::Display for PlannedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            PlannedOperation::Upsert { kind, .. } => kind.to_string(),
            PlannedOperation::Delete { .. } => "delete".to_string(),
        };
        write!(
            f,
            "{verb} '{}' ({}, priority {})",
            self.rule_name(),
            self.direction(),
            self.priority()
        )
    }
}

/// Difference between a desired and an observed policy
///
/// Consumed by [`apply`](crate::core::apply::apply), so a plan is applied at
/// most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub id: Uuid,
    pub policy_name: String,
    pub to_add: Vec<SecurityRule>,
    pub to_update: Vec<RuleUpdate>,
    pub to_remove: Vec<SecurityRule>,
    /// Observed rules moved to a free priority before the upserts that need
    /// their slot, one per cycle of updated rules trading priorities
    #[serde(default)]
    pub parked: Vec<SecurityRule>,
    pub warnings: Vec<ConflictWarning>,
}

fn slot_order(a: &SecurityRule, b: &SecurityRule) -> std::cmp::Ordering {
    a.direction
        .cmp(&b.direction)
        .then(a.priority.cmp(&b.priority))
        .then_with(|| a.name.cmp(&b.name))
}

impl ReconciliationPlan {
    /// `true` when applying would make no remote call
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_remove.len()
    }

    /// Ordered remote calls that carry out this plan.
    pub fn operations(&self) -> Vec<PlannedOperation> {
        let needed: HashSet<(Direction, u32)> = self
            .to_add
            .iter()
            .chain(self.to_update.iter().map(|u| &u.desired))
            .map(SecurityRule::slot)
            .collect();

        let (early, late): (Vec<&SecurityRule>, Vec<&SecurityRule>) = self
            .to_remove
            .iter()
            .partition(|rule| needed.contains(&rule.slot()));

        let delete = |rule: &SecurityRule| PlannedOperation::Delete { rule: rule.clone() };

        early
            .into_iter()
            .map(delete)
            .chain(self.ordered_upserts())
            .chain(late.into_iter().map(delete))
            .collect()
    }

    /// Updates and adds in priority order, each held back until no other
    /// updated rule still occupies its target slot remotely.
    fn ordered_upserts(&self) -> Vec<PlannedOperation> {
        let mut pending: Vec<(UpsertKind, &SecurityRule)> = self
            .to_update
            .iter()
            .map(|u| (UpsertKind::Update, &u.desired))
            .chain(self.to_add.iter().map(|rule| (UpsertKind::Add, rule)))
            .collect();
        pending.sort_by(|a, b| slot_order(a.1, b.1));

        // Slots still held by updated rules that have not moved out yet
        let mut held: HashMap<(Direction, u32), &str> = self
            .to_update
            .iter()
            .filter(|u| u.observed.slot() != u.desired.slot())
            .map(|u| (u.observed.slot(), u.observed.name.as_str()))
            .collect();
        let mut parked = self.parked.iter();

        let mut ops = Vec::with_capacity(pending.len() + self.parked.len());
        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|(_, rule)| !held.contains_key(&rule.slot()));

            let (kind, rule) = if let Some(index) = ready {
                pending.remove(index)
            } else if let Some(rule) = parked.next() {
                (UpsertKind::Park, rule)
            } else {
                // Only reachable for plans edited by hand; the store rejects
                // whatever still collides
                warn!(
                    "Plan for '{}' has {} upsert(s) blocked by a priority cycle",
                    self.policy_name,
                    pending.len()
                );
                ops.extend(pending.drain(..).map(|(kind, rule)| PlannedOperation::Upsert {
                    kind,
                    rule: rule.clone(),
                }));
                break;
            };

            held.retain(|_, holder| *holder != rule.name);
            ops.push(PlannedOperation::Upsert {
                kind,
                rule: rule.clone(),
            });
        }
        ops
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnPath,
    Done,
}

/// Finds cycles of updated rules that each move into the slot the next one
/// holds, and parks one rule per cycle at the lowest-precedence free priority
/// of its direction.
///
/// Every rule holds one slot and targets one slot, so the "waits for" graph
/// is a set of chains and simple cycles.
fn park_cycles(
    to_update: &[RuleUpdate],
    occupied: &mut HashSet<(Direction, u32)>,
) -> Result<Vec<SecurityRule>, Vec<ValidationError>> {
    let moved: Vec<&RuleUpdate> = to_update
        .iter()
        .filter(|u| u.observed.slot() != u.desired.slot())
        .collect();
    let holder: HashMap<(Direction, u32), usize> = moved
        .iter()
        .enumerate()
        .map(|(i, u)| (u.observed.slot(), i))
        .collect();

    let mut state = vec![Visit::New; moved.len()];
    let mut cycles: Vec<Vec<usize>> = Vec::new();
    for start in 0..moved.len() {
        let mut path = Vec::new();
        let mut current = Some(start);
        while let Some(i) = current {
            match state[i] {
                Visit::New => {
                    state[i] = Visit::OnPath;
                    path.push(i);
                    current = holder.get(&moved[i].desired.slot()).copied();
                }
                Visit::OnPath => {
                    if let Some(pos) = path.iter().position(|&p| p == i) {
                        cycles.push(path[pos..].to_vec());
                    }
                    break;
                }
                Visit::Done => break,
            }
        }
        for i in path {
            state[i] = Visit::Done;
        }
    }

    let mut parked = Vec::new();
    let mut errors = Vec::new();
    for cycle in cycles {
        let Some(update) = cycle
            .iter()
            .map(|&i| moved[i])
            .min_by(|a, b| slot_order(&a.observed, &b.observed))
        else {
            continue;
        };
        let direction = update.observed.direction;

        match (MIN_PRIORITY..=MAX_PRIORITY)
            .rev()
            .find(|&p| !occupied.contains(&(direction, p)))
        {
            Some(priority) => {
                occupied.insert((direction, priority));
                debug!(
                    "Parking '{}' at {direction} priority {priority} to break a priority cycle",
                    update.observed.name
                );
                parked.push(update.observed.clone().with_priority(priority));
            }
            None => errors.push(ValidationError::NoFreePriority {
                rule: update.observed.name.clone(),
                direction,
            }),
        }
    }

    if errors.is_empty() {
        parked.sort_by(slot_order);
        Ok(parked)
    } else {
        Err(errors)
    }
}

/// Computes the plan that moves `observed` to `desired`.
///
/// The desired policy is validated first (collect-all); on failure no diff is
/// computed. Conflict warnings are computed against the policy as it will
/// look after apply: the desired rules plus, in additive mode, the unmanaged
/// remote rules that stay in place.
///
/// # Errors
///
/// Returns every validation error of the desired policy, a
/// `DuplicatePriority` for each desired rule whose slot is held by an
/// unmanaged remote rule that will not be removed, and in strict mode one
/// `Conflict` per warning.
pub fn plan(
    desired: &SecurityPolicy,
    observed: &SecurityPolicy,
    options: &PlanOptions,
) -> Result<ReconciliationPlan, ValidationErrors> {
    validate_policy(desired)?;

    if desired.name != observed.name {
        debug!(
            "Planning '{}' against observed policy named '{}'",
            desired.name, observed.name
        );
    }

    let desired_by_name: HashMap<&str, &SecurityRule> = desired
        .rules()
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();
    let observed_by_name: HashMap<&str, &SecurityRule> = observed
        .rules()
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();

    let mut to_add: Vec<SecurityRule> = desired
        .rules()
        .iter()
        .filter(|r| !observed_by_name.contains_key(r.name.as_str()))
        .cloned()
        .collect();
    to_add.sort_by(slot_order);

    let mut to_update: Vec<RuleUpdate> = desired
        .rules()
        .iter()
        .filter_map(|desired_rule| {
            let observed_rule = observed_by_name.get(desired_rule.name.as_str())?;
            let changed = observed_rule.changed_fields(desired_rule);
            (!changed.is_empty()).then(|| RuleUpdate {
                observed: (*observed_rule).clone(),
                desired: desired_rule.clone(),
                changed,
            })
        })
        .collect();
    to_update.sort_by(|a, b| slot_order(&a.desired, &b.desired));

    let unmanaged: Vec<&SecurityRule> = observed
        .rules()
        .iter()
        .filter(|r| !desired_by_name.contains_key(r.name.as_str()))
        .collect();

    let mut to_remove: Vec<SecurityRule> = Vec::new();
    let mut retained: Vec<&SecurityRule> = Vec::new();
    if options.prune_unmanaged {
        to_remove = unmanaged.into_iter().cloned().collect();
        to_remove.sort_by(slot_order);
    } else {
        retained = unmanaged;
    }

    let mut errors = Vec::new();

    // Unmanaged rules kept in place still occupy their slots remotely
    for kept in &retained {
        if let Some(clash) = desired.rule_at(kept.direction, kept.priority) {
            errors.push(ValidationError::DuplicatePriority {
                rule: clash.name.clone(),
                existing: kept.name.clone(),
                direction: kept.direction,
                priority: kept.priority,
            });
        }
    }

    let mut occupied: HashSet<(Direction, u32)> = observed
        .rules()
        .iter()
        .chain(desired.rules())
        .map(SecurityRule::slot)
        .collect();
    let parked = match park_cycles(&to_update, &mut occupied) {
        Ok(parked) => parked,
        Err(cycle_errors) => {
            errors.extend(cycle_errors);
            Vec::new()
        }
    };

    let mut effective = desired.clone();
    for kept in &retained {
        effective.put_rule((*kept).clone());
    }
    let warnings = detect_conflicts(&effective);

    if options.strict {
        errors.extend(warnings.iter().cloned().map(ValidationError::Conflict));
    }

    ValidationErrors::from_vec(errors)?;

    let plan = ReconciliationPlan {
        id: Uuid::new_v4(),
        policy_name: desired.name.clone(),
        to_add,
        to_update,
        to_remove,
        parked,
        warnings,
    };

    info!(
        "Planned '{}': {} add, {} update, {} remove, {} parked, {} warning(s)",
        plan.policy_name,
        plan.to_add.len(),
        plan.to_update.len(),
        plan.to_remove.len(),
        plan.parked.len(),
        plan.warnings.len()
    );

    Ok(plan)
}
