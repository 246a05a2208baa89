//! # Scanner Module
//!
//! Discovers image files below a root directory and records the size and
//! modification time of each, which is all incremental scans compare.
//!
//! ## Example
//! ```rust,ignore
//! use photo_sorter::core::scanner::{ScanOptions, WalkDirScanner};
//!
//! let scanner = WalkDirScanner::new(ScanOptions::from_config(&config));
//! let outcome = scanner.scan(root, &cancel, &events)?;
//! ```

mod filter;
mod walker;

pub use filter::ImageFilter;
pub use walker::{canonical_root, ScanOptions, WalkDirScanner};

use crate::core::record::FileStamp;
use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file seen during traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Absolute path
    pub path: PathBuf,
    pub stamp: FileStamp,
}

/// Result of one traversal
#[derive(Debug)]
pub struct ScanOutcome {
    /// Canonical root that was walked
    pub root: PathBuf,
    /// Matching files in path order
    pub files: Vec<FileSnapshot>,
    /// Errors that occurred during traversal (non-fatal)
    pub errors: Vec<ScanError>,
}
