//! # Cluster Module
//!
//! Groups records into duplicate and near-duplicate sets.
//!
//! ## Algorithm
//! Union-find over every unpinned record:
//! - records with identical content hashes are always joined
//! - each record is joined with every index neighbour within the threshold
//!
//! Pinned records skip connectivity entirely and are placed directly in
//! the cluster their pin names. The result is a partition: every record
//! appears in exactly one cluster, singletons included.

mod builder;
mod types;
mod union_find;

pub use builder::ClusterBuilder;
pub use types::{
    Cluster, ClusterId, ClusterKind, ClusterPartition, ClusterStats, PinTarget, PinnedAssignments,
};
pub use union_find::UnionFind;
