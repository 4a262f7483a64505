//! Plain-text rendering of policies and plans for the CLI

use crate::core::plan::ReconciliationPlan;
use crate::core::policy::{Direction, SecurityPolicy, SecurityRule};
use crate::utils::truncate_string;
use std::fmt::Write;
use strum::IntoEnumIterator;

const HEADERS: [&str; 9] = [
    "PRIORITY",
    "NAME",
    "DIRECTION",
    "ACCESS",
    "PROTOCOL",
    "SOURCE",
    "SRC PORTS",
    "DESTINATION",
    "DST PORTS",
];

/// Longest cell rendered before truncation
const MAX_CELL: usize = 32;

fn cells(rule: &SecurityRule) -> [String; 9] {
    [
        rule.priority.to_string(),
        truncate_string(&rule.name, MAX_CELL),
        rule.direction.to_string(),
        rule.access.to_string(),
        rule.protocol.to_string(),
        truncate_string(&rule.source_address_prefix, MAX_CELL),
        truncate_string(&rule.source_port_range, MAX_CELL),
        truncate_string(&rule.destination_address_prefix, MAX_CELL),
        truncate_string(&rule.destination_port_range, MAX_CELL),
    ]
}

/// Renders a policy as an aligned table in evaluation order
/// (inbound first, then outbound; ascending priority).
pub fn render_policy(policy: &SecurityPolicy) -> String {
    let rows: Vec<[String; 9]> = Direction::iter()
        .flat_map(|direction| policy.ordered(direction))
        .map(cells)
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "Security group: {} ({} rules)", policy.name, policy.len());
    if rows.is_empty() {
        out.push_str("  (no rules)\n");
        return out;
    }

    let mut push_row = |row: &[&str]| {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        let _ = writeln!(out, "  {}", line.join("  ").trim_end());
    };

    push_row(&HEADERS[..]);
    for row in &rows {
        let refs: Vec<&str> = row.iter().map(String::as_str).collect();
        push_row(&refs);
    }
    out
}

/// Renders the changes a plan would make, one line per operation.
pub fn render_plan(plan: &ReconciliationPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Plan {} for '{}': {} to add, {} to update, {} to remove",
        plan.id,
        plan.policy_name,
        plan.to_add.len(),
        plan.to_update.len(),
        plan.to_remove.len()
    );

    if plan.is_empty() {
        out.push_str("  No changes. Remote policy is up to date.\n");
    }

    for (index, operation) in plan.operations().iter().enumerate() {
        let _ = writeln!(out, "  {:>3}. {operation}", index + 1);
    }

    for update in &plan.to_update {
        let fields: Vec<String> = update.changed.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            out,
            "       '{}' changes: {}",
            update.desired.name,
            fields.join(", ")
        );
    }

    if !plan.warnings.is_empty() {
        let _ = writeln!(out, "Warnings:");
        for warning in &plan.warnings {
            let _ = writeln!(out, "  ! {warning}");
        }
    }
    out
}

/// Line diff between two rendered policies, `None` if they render the same.
pub fn diff_policies(old: &SecurityPolicy, new: &SecurityPolicy) -> Option<String> {
    let old_text = render_policy(old);
    let new_text = render_policy(new);
    if old_text == new_text {
        return None;
    }

    let diff = similar::TextDiff::from_lines(&old_text, &new_text);
    let mut result = String::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => "- ",
            similar::ChangeTag::Insert => "+ ",
            similar::ChangeTag::Equal => "  ",
        };
        let _ = write!(result, "{sign}{change}");
    }

    Some(result)
}
