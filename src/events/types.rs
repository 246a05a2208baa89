//! Event type definitions for progress reporting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by the scan coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Coordinator state machine events
    Coordinator(CoordinatorEvent),
    /// Directory traversal events
    Scan(ScanEvent),
    /// Fingerprint extraction events
    Extract(ExtractEvent),
    /// Clustering events
    Cluster(ClusterEvent),
    /// Sort planning events
    Plan(PlanEvent),
    /// Plan execution events
    Execute(ExecuteEvent),
}

/// States of the scan coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Idle,
    Scanning,
    Extracting,
    Clustering,
    Planning,
    Executing,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Idle => write!(f, "Idle"),
            CoordinatorState::Scanning => write!(f, "Scanning"),
            CoordinatorState::Extracting => write!(f, "Extracting"),
            CoordinatorState::Clustering => write!(f, "Clustering"),
            CoordinatorState::Planning => write!(f, "Planning"),
            CoordinatorState::Executing => write!(f, "Executing"),
        }
    }
}

/// Coordinator-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinatorEvent {
    /// The coordinator moved to a new state
    StateChanged { state: CoordinatorState },
    /// A scan was cancelled; committed records are kept
    Cancelled { committed: usize },
    /// A pass was aborted by an internal error
    PassAborted { message: String },
}

/// Events during directory traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Traversal has started
    Started { root: PathBuf },
    /// A directory is being read
    Directory { path: PathBuf, files_found: usize },
    /// An error occurred but traversal continues
    Error { path: PathBuf, message: String },
    /// Traversal completed with the change set against the record table
    Completed(ChangeSummary),
}

/// Difference between the filesystem and the last known record table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Files seen for the first time
    pub added: usize,
    /// Files whose size or modification time changed
    pub modified: usize,
    /// Records whose file disappeared
    pub removed: usize,
    /// Files trusted without re-extraction
    pub unchanged: usize,
}

/// Events during fingerprint extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractEvent {
    /// Extraction has started
    Started { total: usize },
    /// One file's result was committed
    Progress(ExtractProgress),
    /// A file could not be decoded; it is excluded from clustering
    Unreadable { path: PathBuf, message: String },
    /// Extraction finished (possibly early, on cancellation)
    Completed {
        extracted: usize,
        unreadable: usize,
        cancelled: bool,
    },
}

/// Progress information during extraction.
///
/// `processed` never decreases, whatever order workers finish in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractProgress {
    /// Results committed so far
    pub processed: usize,
    /// Files queued for extraction
    pub total: usize,
    /// File whose result was just committed
    pub current_path: PathBuf,
}

/// Events during clustering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// Clustering has started
    Started { records: usize, threshold: u32 },
    /// Clustering completed
    Completed {
        clusters: usize,
        duplicate_groups: usize,
        candidates_checked: usize,
    },
}

/// Events during sort planning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanEvent {
    /// Planning has started
    Started { clusters: usize },
    /// Planning completed
    Completed {
        plan_id: String,
        entries: usize,
        fallbacks: usize,
    },
}

/// Events during plan execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecuteEvent {
    /// Execution has started
    Started { entries: usize },
    /// One entry was attempted
    EntryFinished {
        index: usize,
        total: usize,
        source: PathBuf,
        succeeded: bool,
    },
    /// Execution completed
    Completed { applied: usize, failed: usize },
}
