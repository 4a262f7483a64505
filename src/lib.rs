//! secgroup - declarative network security groups
//!
//! Validates prioritized allow/deny rule sets, detects rules that can never
//! fire, and reconciles a remote group with a declared policy through a
//! pluggable resource client.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, conflict detection, planning, apply and clients
//! - [`audit`] - Audit logging of every change made to a store
//! - [`validators`] - Field parsing and input validation
//! - [`config`] - Configuration persistence
//! - [`demo`] - Two-tier network walkthrough
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Safety Features
//!
//! - Collect-all validation before any remote call
//! - Deletes that free a priority slot run before the upserts that need it
//! - Per-policy apply locks and cooperative cancellation
//! - SHA-256 checksums and atomic writes with secure permissions for stored policies

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod demo;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use crate::core::apply::{ApplyReport, apply};
pub use crate::core::client::{PolicyLifecycle, ResourceClient};
pub use crate::core::conflicts::{ConflictKind, ConflictWarning, detect_conflicts};
pub use crate::core::error::{ApplyError, ClientError, Error, Result, ValidationError, ValidationErrors};
pub use crate::core::plan::{PlanOptions, ReconciliationPlan, plan};
pub use crate::core::policy::{
    Access, DefaultPolicy, Direction, Protocol, SecurityPolicy, SecurityRule, validate_policy,
    validate_rule,
};
pub use crate::core::reconciler::{ReconcileOutcome, Reconciler};
