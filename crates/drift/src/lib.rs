//! # drift
//!
//! Domain types for drift detection and bidirectional reconciliation.
//!
//! This crate defines the vocabulary the validator and the reconciliation
//! engine share:
//!
//! - **Finding**: one classified discrepancy between stored desired state
//!   and live remote state, tagged with a closed [`FindingCategory`] that
//!   carries typed repair data (no stringly-typed category matching).
//! - **ValidationReport**: findings bucketed into passed/warnings/issues,
//!   with the aggregation rule (critical → failed, error → needs_fixes,
//!   warning → passed_with_warnings).
//! - **RepairAction / RepairPlan**: the typed, deduplicated repairs an
//!   engine executes sequentially.
//! - **TrustStrategy**: the named seam for the bidirectional "trust the
//!   host vs. trust the record" policy, with the default
//!   [`PreferTenantUser`] implementation.
//!
//! Execution is intentionally absent: per-tenant repair is a sequential
//! chain of remote calls owned by the engine that holds the transport, and
//! cross-tenant parallelism belongs to the caller.

pub mod action;
pub mod category;
pub mod report;
pub mod strategy;
pub mod types;

pub use action::{PlannedAction, RepairAction, RepairPlan};
pub use category::FindingCategory;
pub use report::{Finding, ValidationReport};
pub use strategy::{OwnershipEvidence, PreferTenantUser, TenantUser, TrustDecision, TrustStrategy};
pub use types::{RepairOutcome, RepairSummary, Severity, ValidationStatus};
