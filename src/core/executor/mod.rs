//! # Executor Module
//!
//! Applies a sort plan to the filesystem, one entry at a time.
//!
//! Entries never replace existing files. A failed entry is reported and
//! the executor moves on; entries already applied stay applied. The
//! caller's callback runs after every entry, before the next one starts,
//! so record paths can follow each successful move immediately.

mod transfer;

pub use transfer::{move_no_clobber, MoveMethod};

use crate::core::planner::{PlanEntry, SortPlan};
use crate::error::ExecutionError;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

/// Result of one plan entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    /// Position in the plan
    pub index: usize,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub result: Result<MoveMethod, ExecutionError>,
}

impl EntryOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-entry results for a whole plan
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub plan_id: String,
    pub outcomes: Vec<EntryOutcome>,
    pub folders_created: usize,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.applied()
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

/// Executes sort plans sequentially
pub struct PlanExecutor;

impl PlanExecutor {
    /// Apply every entry in order. `on_entry` sees each outcome as soon as
    /// the entry finishes.
    pub fn execute<F>(plan: &SortPlan, mut on_entry: F) -> ExecutionReport
    where
        F: FnMut(&PlanEntry, &EntryOutcome),
    {
        let start = Instant::now();
        let mut created_dirs: HashSet<PathBuf> = HashSet::new();
        let mut folders_created = 0usize;
        let mut outcomes = Vec::with_capacity(plan.entries.len());

        for (index, entry) in plan.entries.iter().enumerate() {
            let result = Self::ensure_parent(&entry.destination, &mut created_dirs)
                .map(|created| folders_created += created)
                .and_then(|()| move_no_clobber(&entry.source, &entry.destination));

            match &result {
                Ok(method) => tracing::debug!(
                    source = %entry.source.display(),
                    destination = %entry.destination.display(),
                    ?method,
                    "moved"
                ),
                Err(e) => tracing::warn!(source = %entry.source.display(), "{}", e),
            }

            let outcome = EntryOutcome {
                index,
                source: entry.source.clone(),
                destination: entry.destination.clone(),
                result,
            };
            on_entry(entry, &outcome);
            outcomes.push(outcome);
        }

        let report = ExecutionReport {
            plan_id: plan.id.clone(),
            outcomes,
            folders_created,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            plan = %report.plan_id,
            applied = report.applied(),
            failed = report.failed(),
            "Plan executed"
        );
        report
    }

    /// Create the destination folder if needed; returns how many folders
    /// were newly created
    fn ensure_parent(
        destination: &Path,
        created: &mut HashSet<PathBuf>,
    ) -> Result<usize, ExecutionError> {
        let Some(parent) = destination.parent() else {
            return Ok(0);
        };
        if created.contains(parent) || parent.is_dir() {
            return Ok(0);
        }
        fs::create_dir_all(parent).map_err(|e| ExecutionError::Io {
            path: parent.to_path_buf(),
            reason: e.to_string(),
        })?;
        created.insert(parent.to_path_buf());
        Ok(1)
    }

    /// Permanently delete every file under the quarantine root.
    ///
    /// This is the only operation that deletes photos and is never part of
    /// a plan; callers confirm it separately.
    pub fn purge_quarantine(quarantine_root: &Path) -> Vec<(PathBuf, Result<(), ExecutionError>)> {
        let mut results = Vec::new();
        for entry in WalkDir::new(quarantine_root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.into_path();
            let result = fs::remove_file(&path).map_err(|e| ExecutionError::Io {
                path: path.clone(),
                reason: e.to_string(),
            });
            results.push((path, result));
        }

        // Empty cluster folders left behind
        for entry in WalkDir::new(quarantine_root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let _ = fs::remove_dir(entry.path());
        }

        tracing::info!(
            root = %quarantine_root.display(),
            deleted = results.iter().filter(|(_, r)| r.is_ok()).count(),
            "Quarantine purged"
        );
        results
    }
}
