//! Types for sort plans.

use crate::core::cluster::ClusterId;
use crate::core::config::{FingerprintParams, PlanPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What an entry does with its file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Move into the library under its capture-time bucket
    File,
    /// Move a non-keeper duplicate into quarantine
    Quarantine,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::File => write!(f, "file"),
            ActionKind::Quarantine => write!(f, "quarantine"),
        }
    }
}

/// Conditions the UI should surface for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFlag {
    /// No capture metadata; the modification time chose the bucket
    CaptureTimeFallback,
    /// The natural destination was taken and a suffix was added
    Renamed,
}

/// One planned move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub action: ActionKind,
    pub cluster_id: ClusterId,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<PlanFlag>,
}

impl PlanEntry {
    pub fn has_flag(&self, flag: PlanFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Totals for a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub clusters: usize,
    pub duplicate_groups: usize,
    pub filed: usize,
    pub quarantined: usize,
    /// Records already at their destination
    pub unchanged: usize,
    pub capture_fallbacks: usize,
    pub renamed: usize,
    pub bytes_quarantined: u64,
}

/// An immutable, fully computed organisation plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPlan {
    /// Derived from the entries; equal plans share an id
    pub id: String,
    pub fingerprint: FingerprintParams,
    pub threshold: u32,
    pub policy: PlanPolicy,
    pub entries: Vec<PlanEntry>,
    pub summary: PlanSummary,
}

impl SortPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flagged(&self, flag: PlanFlag) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(move |e| e.has_flag(flag))
    }
}
