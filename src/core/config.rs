//! Configuration bundle for a sorter run.
//!
//! Fingerprint parameters, threshold and plan policy have no library
//! defaults: every caller states them, and every plan echoes them back.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Smallest supported reduced grid
pub const MIN_GRID_SIZE: u32 = 2;
/// Largest supported reduced grid (1024-bit fingerprints)
pub const MAX_GRID_SIZE: u32 = 32;

/// Extraction constants shared by every record in a table.
///
/// Fingerprints computed with different parameters are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintParams {
    /// Side of the reduced grid; the reducer produces (grid + 1) x grid cells
    pub grid_size: u32,
}

impl FingerprintParams {
    pub fn new(grid_size: u32) -> Self {
        Self { grid_size }
    }

    /// Number of bits in a fingerprint
    pub fn bit_count(&self) -> u32 {
        self.grid_size * self.grid_size
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_GRID_SIZE..=MAX_GRID_SIZE).contains(&self.grid_size) {
            return Err(ConfigError::InvalidGridSize {
                value: self.grid_size,
            });
        }
        Ok(())
    }
}

/// Primary criterion for choosing the keeper of a duplicate group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperRule {
    /// Highest pixel count, then earliest capture, then smallest path
    Resolution,
    /// Earliest capture, then highest pixel count, then smallest path
    CaptureTime,
    /// Lexicographically smallest path
    Path,
}

impl std::fmt::Display for KeeperRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeeperRule::Resolution => write!(f, "resolution"),
            KeeperRule::CaptureTime => write!(f, "capture-time"),
            KeeperRule::Path => write!(f, "path"),
        }
    }
}

/// Folder layout for filed photos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketRule {
    /// `2024/IMG_0001.jpg`
    Year,
    /// `2024/01/IMG_0001.jpg`
    YearMonth,
    /// `IMG_0001.jpg`
    Flat,
}

impl std::fmt::Display for BucketRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BucketRule::Year => write!(f, "year"),
            BucketRule::YearMonth => write!(f, "year-month"),
            BucketRule::Flat => write!(f, "flat"),
        }
    }
}

/// How a plan files keepers and quarantines duplicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPolicy {
    pub keeper_rule: KeeperRule,
    pub bucketing: BucketRule,
    /// Destination root for keepers and singletons
    pub library_root: PathBuf,
    /// Destination root for non-keeper duplicates
    pub quarantine_root: PathBuf,
}

/// Everything a run needs besides the scan root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorterConfig {
    pub fingerprint: FingerprintParams,
    /// Maximum Hamming distance for a similarity edge
    pub threshold: u32,
    pub policy: PlanPolicy,
    /// Lowercase extensions to include
    #[serde(default = "default_extensions")]
    pub extensions: BTreeSet<String>,
    /// Maximum traversal depth (None = unbounded)
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Extraction workers (None = available cores)
    #[serde(default)]
    pub workers: Option<usize>,
}

impl SorterConfig {
    /// Create a configuration with the standard image extensions and
    /// unbounded traversal.
    pub fn new(fingerprint: FingerprintParams, threshold: u32, policy: PlanPolicy) -> Self {
        Self {
            fingerprint,
            threshold,
            policy,
            extensions: default_extensions(),
            max_depth: None,
            include_hidden: false,
            follow_symlinks: false,
            workers: None,
        }
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config: SorterConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.extensions = config
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fingerprint.validate()?;

        let max = self.fingerprint.bit_count();
        if self.threshold >= max {
            return Err(ConfigError::InvalidThreshold {
                value: self.threshold,
                max,
            });
        }

        if self.extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        if self.workers == Some(0) {
            return Err(ConfigError::NoWorkers);
        }

        let library = &self.policy.library_root;
        let quarantine = &self.policy.quarantine_root;
        if library.starts_with(quarantine) || quarantine.starts_with(library) {
            return Err(ConfigError::OverlappingRoots {
                path: quarantine.clone(),
            });
        }

        Ok(())
    }

    /// Number of extraction workers to start
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// The image extensions scanned when none are configured
pub fn default_extensions() -> BTreeSet<String> {
    ["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "tif"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}
