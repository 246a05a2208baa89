//! Cluster partition types and manual overrides.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for cluster ids
const CLUSTER_NAMESPACE: Uuid = Uuid::from_u128(0x5d6f_0c3a_8e41_4b57_9a1e_3c27_f0b4_d812);

/// Stable cluster identifier, derived from the sorted member paths.
///
/// Two passes produce the same id exactly when membership is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(Uuid);

impl ClusterId {
    /// `members` must already be sorted
    pub fn for_members(members: &[PathBuf]) -> Self {
        let mut name = Vec::new();
        for path in members {
            name.extend_from_slice(path.as_os_str().as_encoded_bytes());
            name.push(0);
        }
        Self(Uuid::new_v5(&CLUSTER_NAMESPACE, &name))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// How a cluster came together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    /// One record with no neighbours
    Singleton,
    /// Every member has the same content hash
    Exact,
    /// Joined through fingerprint distance
    Similar,
    /// Contains at least one pinned record
    Manual,
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterKind::Singleton => write!(f, "singleton"),
            ClusterKind::Exact => write!(f, "exact"),
            ClusterKind::Similar => write!(f, "similar"),
            ClusterKind::Manual => write!(f, "manual"),
        }
    }
}

/// A set of records connected by similarity edges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub kind: ClusterKind,
    /// Smallest member path
    pub representative: PathBuf,
    /// Members in path order
    pub members: Vec<PathBuf>,
    /// Largest verified edge distance that joined two members
    pub max_distance: u32,
    /// Label of the manual group, if pinned to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True for clusters with more than one member
    pub fn is_duplicate_group(&self) -> bool {
        self.members.len() > 1
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.members.binary_search_by(|m| m.as_path().cmp(path)).is_ok()
    }
}

/// Counters from one clustering pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub records: usize,
    pub pinned: usize,
    /// Fingerprint comparisons performed after band filtering
    pub candidates_checked: usize,
    /// Pairs joined through identical content hashes
    pub exact_pairs: usize,
}

/// Every record in exactly one cluster, ordered by representative
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterPartition {
    pub threshold: u32,
    clusters: Vec<Cluster>,
    #[serde(skip)]
    by_path: HashMap<PathBuf, usize>,
    pub stats: ClusterStats,
}

impl ClusterPartition {
    pub fn new(threshold: u32, mut clusters: Vec<Cluster>, stats: ClusterStats) -> Self {
        clusters.sort_by(|a, b| a.representative.cmp(&b.representative));
        let by_path = clusters
            .iter()
            .enumerate()
            .flat_map(|(i, c)| c.members.iter().map(move |m| (m.clone(), i)))
            .collect();
        Self {
            threshold,
            clusters,
            by_path,
            stats,
        }
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Number of records across all clusters
    pub fn record_count(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }

    pub fn cluster_of(&self, path: &Path) -> Option<&Cluster> {
        self.by_path.get(path).map(|&i| &self.clusters[i])
    }

    pub fn get(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id == id)
    }

    pub fn duplicate_groups(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter().filter(|c| c.is_duplicate_group())
    }
}

/// Where a pinned record must go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinTarget {
    /// Same cluster as another record
    WithRecord(PathBuf),
    /// A manual cluster shared by every record pinned to this label
    Group(String),
}

/// Manual cluster-membership overrides, consulted before connectivity is
/// derived. Pinned records never take part in the union-find pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedAssignments {
    pins: BTreeMap<PathBuf, PinTarget>,
}

impl PinnedAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a record, replacing any earlier pin for it
    pub fn pin(&mut self, path: PathBuf, target: PinTarget) -> Option<PinTarget> {
        self.pins.insert(path, target)
    }

    pub fn unpin(&mut self, path: &Path) -> Option<PinTarget> {
        self.pins.remove(path)
    }

    pub fn get(&self, path: &Path) -> Option<&PinTarget> {
        self.pins.get(path)
    }

    pub fn is_pinned(&self, path: &Path) -> bool {
        self.pins.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &PinTarget)> {
        self.pins.iter()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn clear(&mut self) {
        self.pins.clear();
    }

    /// Follow a file move: re-key its own pin and any pin pointing at it
    pub fn relocate(&mut self, from: &Path, to: &Path) {
        if let Some(target) = self.pins.remove(from) {
            self.pins.insert(to.to_path_buf(), target);
        }
        for target in self.pins.values_mut() {
            if let PinTarget::WithRecord(anchor) = target {
                if anchor == from {
                    *anchor = to.to_path_buf();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_id_depends_only_on_members() {
        let a = vec![PathBuf::from("/p/a.jpg"), PathBuf::from("/p/b.jpg")];
        let b = vec![PathBuf::from("/p/a.jpg"), PathBuf::from("/p/b.jpg")];
        let c = vec![PathBuf::from("/p/a.jpg"), PathBuf::from("/p/c.jpg")];
        assert_eq!(ClusterId::for_members(&a), ClusterId::for_members(&b));
        assert_ne!(ClusterId::for_members(&a), ClusterId::for_members(&c));
    }

    #[test]
    fn cluster_id_separates_path_boundaries() {
        let joined = vec![PathBuf::from("/p/ab")];
        let split = vec![PathBuf::from("/p/a"), PathBuf::from("b")];
        assert_ne!(ClusterId::for_members(&joined), ClusterId::for_members(&split));
    }

    #[test]
    fn partition_orders_by_representative() {
        let make = |paths: &[&str]| {
            let members: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
            Cluster {
                id: ClusterId::for_members(&members),
                kind: ClusterKind::Similar,
                representative: members[0].clone(),
                members,
                max_distance: 0,
                label: None,
            }
        };
        let partition = ClusterPartition::new(
            3,
            vec![make(&["/z.jpg"]), make(&["/a.jpg", "/m.jpg"])],
            ClusterStats::default(),
        );

        assert_eq!(partition.clusters()[0].representative, PathBuf::from("/a.jpg"));
        assert_eq!(
            partition.cluster_of(Path::new("/m.jpg")).unwrap().representative,
            PathBuf::from("/a.jpg")
        );
        assert_eq!(partition.record_count(), 3);
        assert_eq!(partition.duplicate_groups().count(), 1);
    }

    #[test]
    fn relocate_follows_moved_anchor() {
        let mut pins = PinnedAssignments::new();
        pins.pin(
            PathBuf::from("/p/b.jpg"),
            PinTarget::WithRecord(PathBuf::from("/p/a.jpg")),
        );
        pins.relocate(Path::new("/p/a.jpg"), Path::new("/lib/a.jpg"));
        assert_eq!(
            pins.get(Path::new("/p/b.jpg")),
            Some(&PinTarget::WithRecord(PathBuf::from("/lib/a.jpg")))
        );

        pins.relocate(Path::new("/p/b.jpg"), Path::new("/lib/b.jpg"));
        assert!(pins.is_pinned(Path::new("/lib/b.jpg")));
        assert!(!pins.is_pinned(Path::new("/p/b.jpg")));
    }
}
