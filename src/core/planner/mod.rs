//! # Planner Module
//!
//! Turns a cluster partition into a deterministic sort plan.
//!
//! Each duplicate group keeps one member, chosen by the configured keeper
//! rule; the rest are quarantined. Keepers and singletons are filed under
//! `library_root/<bucket>/<filename>`, quarantined files under
//! `quarantine_root/<cluster id>/<filename>`. Taken destinations get a
//! `_N` suffix before the extension.

mod generator;
mod types;

pub use generator::{bucket_components, keeper_order, SortPlanner};
pub use types::{ActionKind, PlanEntry, PlanFlag, PlanSummary, SortPlan};
