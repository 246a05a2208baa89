//! # Error Module
//!
//! Error types for the photo sorter engine.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - paths, file names, what went wrong
//! - **Per-file errors are values** - a broken photo never aborts a scan
//! - **Pass-level errors abort the pass** - committed state stays intact

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum SorterError {
    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Similarity index error: {0}")]
    Index(#[from] IndexError),

    #[error("Clustering error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation not allowed while coordinator is {state}")]
    Busy { state: String },

    #[error("Failed to start extraction workers: {0}")]
    WorkerPool(String),

    #[error("Failed to write output: {0}")]
    Output(String),
}

/// Errors that occur during directory traversal
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scan was cancelled")]
    Cancelled,
}

/// Errors that occur while extracting a fingerprint from one file.
///
/// These are always per-file and non-fatal: the file is recorded as
/// unreadable and left out of clustering.
#[derive(Error, Debug, Clone)]
pub enum ExtractError {
    #[error("Failed to decode image {path}: {reason}")]
    DecodeError { path: PathBuf, reason: String },

    #[error("Image is empty or corrupted: {path}")]
    EmptyImage { path: PathBuf },

    #[error("Failed to read image file {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

impl ExtractError {
    /// Path of the file that failed
    pub fn path(&self) -> &PathBuf {
        match self {
            ExtractError::DecodeError { path, .. }
            | ExtractError::EmptyImage { path }
            | ExtractError::Io { path, .. } => path,
        }
    }
}

/// Errors raised by the similarity index.
///
/// An inconsistency means the index no longer matches what was inserted;
/// the current pass must stop rather than return partial neighbours.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index inconsistency: {path} missing from band {band} bucket {value:#x}")]
    Inconsistency {
        path: PathBuf,
        band: usize,
        value: u64,
    },

    #[error("Record not indexed: {path}")]
    NotIndexed { path: PathBuf },

    #[error("Fingerprint for {path} uses grid {found}, index expects grid {expected}")]
    ParamsMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("Record already indexed: {path}")]
    DuplicatePath { path: PathBuf },
}

/// Errors that abort a clustering pass
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Pinned record {path} cannot be placed: {reason}")]
    UnresolvablePin { path: PathBuf, reason: String },
}

/// Internal plan validation failures.
///
/// The planner resolves collisions before returning, so these only surface
/// if that resolution is broken.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Two plan entries share destination {destination}")]
    Collision { destination: PathBuf },

    #[error("Plan would move {path} onto itself")]
    SelfMove { path: PathBuf },

    #[error("Cluster references unknown record {path}")]
    UnknownRecord { path: PathBuf },
}

/// Failure applying one plan entry. Never aborts the plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Source file not found: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Destination already exists: {path}")]
    DestinationExists { path: PathBuf },

    #[error("Copy verification failed for {path}: {reason}")]
    VerificationFailed { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

/// Errors with the persisted record table
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open state database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("State file {path} has schema version {found}, expected {expected}. Delete this file and rescan.")]
    VersionMismatch {
        path: PathBuf,
        found: i64,
        expected: i64,
    },

    #[error("Failed to decode stored record: {0}")]
    Corrupted(String),

    #[error("Failed to replace state file {path}: {reason}")]
    PersistFailed { path: PathBuf, reason: String },
}

/// Invalid configuration bundle
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid grid size: {value} (must be 2-32)")]
    InvalidGridSize { value: u32 },

    #[error("Invalid threshold: {value} (must be below {max})")]
    InvalidThreshold { value: u32, max: u32 },

    #[error("Extension filter is empty")]
    NoExtensions,

    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Library and quarantine roots must differ: {path}")]
    OverlappingRoots { path: PathBuf },

    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, SorterError>;
