//! Core security group reconciliation functionality
//!
//! This module contains the core types and logic for keeping remote security
//! groups in line with a declared policy. It provides:
//!
//! - [`policy`]: Rule and policy data structures, validation and evaluation
//! - [`coverage`]: Interval-set model of the traffic a rule matches
//! - [`conflicts`]: Redundant and shadowed rule detection
//! - [`plan`]: Diffing a desired policy against the observed one
//! - [`apply`]: Executing a plan against a resource client
//! - [`client`]: The resource client abstraction
//! - [`store`] and [`memory`]: File-backed and in-memory clients
//! - [`lock`] and [`reconciler`]: Per-policy serialised fetch/plan/apply
//! - [`verify`]: Pre-flight checks of policy files
//! - [`render`]: Text tables, plan listings and diffs
//! - [`error`]: Error types

pub mod apply;
pub mod client;
pub mod conflicts;
pub mod coverage;
pub mod error;
pub mod lock;
pub mod memory;
pub mod plan;
pub mod policy;
pub mod reconciler;
pub mod render;
pub mod store;
pub mod verify;

#[cfg(test)]
pub mod test_helpers;
