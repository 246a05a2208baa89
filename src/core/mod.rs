//! # Core Module
//!
//! The GUI-agnostic photo sorting engine.
//!
//! ## Modules
//! - `scanner` - Discovers image files and their size/mtime stamps
//! - `extractor` - Decodes images into fingerprints and content hashes
//! - `index` - Banded similarity index with exact verification
//! - `cluster` - Union-find clustering with pinned overrides
//! - `planner` - Keeper ranking, bucketing and collision-free destinations
//! - `executor` - Applies a plan with no-clobber moves
//! - `store` - Persists the record table between runs
//! - `coordinator` - Owns the state and drives everything above

pub mod cancel;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod extractor;
pub mod index;
pub mod planner;
pub mod record;
pub mod scanner;
pub mod store;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use cluster::{Cluster, ClusterId, ClusterKind, ClusterPartition, PinTarget};
pub use config::{BucketRule, FingerprintParams, KeeperRule, PlanPolicy, SorterConfig};
pub use coordinator::{Coordinator, ScanReport};
pub use executor::{ExecutionReport, PlanExecutor};
pub use planner::{ActionKind, PlanEntry, SortPlan};
pub use record::{ImageRecord, RecordTable};
