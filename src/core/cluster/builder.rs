//! Builds the cluster partition from the record table and the index.

use super::types::{
    Cluster, ClusterId, ClusterKind, ClusterPartition, ClusterStats, PinTarget, PinnedAssignments,
};
use super::union_find::UnionFind;
use crate::core::extractor::ContentHash;
use crate::core::index::SimilarityIndex;
use crate::core::record::{ImageRecord, RecordTable};
use crate::error::{ClusterError, IndexError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Where a pinned record resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    /// Cluster of this unpinned record
    Anchor(usize),
    /// Manual group with this label
    Group(String),
}

/// Groups records with union-find over verified similarity edges
pub struct ClusterBuilder {
    threshold: u32,
}

impl ClusterBuilder {
    /// Records within `threshold` Hamming distance are joined. Zero means
    /// only identical content is joined.
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Produce the partition of every readable record.
    ///
    /// Fails without partial output if the index disagrees with the table.
    pub fn build(
        &self,
        table: &RecordTable,
        index: &SimilarityIndex,
        pins: &PinnedAssignments,
    ) -> Result<ClusterPartition, ClusterError> {
        let records: Vec<&ImageRecord> = table.records().collect();
        let position: HashMap<&Path, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.path.as_path(), i))
            .collect();

        let placements = resolve_pins(pins, &position)?;
        let is_pinned = |i: usize| placements.contains_key(&i);

        let mut uf = UnionFind::new(records.len());
        let mut max_edge = vec![0u32; records.len()];
        let mut stats = ClusterStats {
            records: records.len(),
            pinned: placements.len(),
            ..ClusterStats::default()
        };

        // Identical bytes are always joined
        let mut first_with_hash: HashMap<ContentHash, usize> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            if is_pinned(i) {
                continue;
            }
            match first_with_hash.get(&record.content_hash) {
                Some(&first) => {
                    let distance = record.fingerprint.distance(&records[first].fingerprint);
                    join(&mut uf, &mut max_edge, first, i, distance);
                    stats.exact_pairs += 1;
                }
                None => {
                    first_with_hash.insert(record.content_hash, i);
                }
            }
        }

        if self.threshold > 0 {
            for (i, record) in records.iter().enumerate() {
                if is_pinned(i) {
                    continue;
                }
                let neighborhood = index.neighbors_of(&record.path, self.threshold)?;
                stats.candidates_checked += neighborhood.candidates;

                for neighbor in neighborhood.neighbors {
                    let j = *position.get(neighbor.path.as_path()).ok_or_else(|| {
                        IndexError::NotIndexed {
                            path: neighbor.path.clone(),
                        }
                    })?;
                    // Each edge is seen from both ends; handle it once
                    if j <= i || is_pinned(j) {
                        continue;
                    }
                    join(&mut uf, &mut max_edge, i, j, neighbor.distance);
                }
            }
        }

        // Collect unpinned sets by root, then place pinned records
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..records.len() {
            if !is_pinned(i) {
                by_root.entry(uf.find(i)).or_default().push(i);
            }
        }
        let mut manual_roots: BTreeSet<usize> = BTreeSet::new();
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (&i, placement) in &placements {
            match placement {
                Placement::Anchor(anchor) => {
                    let root = uf.find(*anchor);
                    by_root.entry(root).or_default().push(i);
                    manual_roots.insert(root);
                }
                Placement::Group(label) => groups.entry(label.clone()).or_default().push(i),
            }
        }

        let mut clusters = Vec::with_capacity(by_root.len() + groups.len());
        for (root, members) in by_root {
            let manual = manual_roots.contains(&root);
            clusters.push(make_cluster(&records, members, max_edge[root], manual, None));
        }
        for (label, members) in groups {
            clusters.push(make_cluster(&records, members, 0, true, Some(label)));
        }

        let partition = ClusterPartition::new(self.threshold, clusters, stats);
        tracing::info!(
            clusters = partition.len(),
            duplicate_groups = partition.duplicate_groups().count(),
            candidates = stats.candidates_checked,
            "Clustering complete"
        );
        Ok(partition)
    }
}

fn join(uf: &mut UnionFind, max_edge: &mut [u32], a: usize, b: usize, distance: u32) {
    let before = max_edge[uf.find(a)].max(max_edge[uf.find(b)]);
    uf.union(a, b);
    let root = uf.find(a);
    max_edge[root] = before.max(distance);
}

fn make_cluster(
    records: &[&ImageRecord],
    mut members: Vec<usize>,
    max_distance: u32,
    manual: bool,
    label: Option<String>,
) -> Cluster {
    members.sort_unstable();
    let paths: Vec<PathBuf> = members.iter().map(|&i| records[i].path.clone()).collect();

    let first_hash = records[members[0]].content_hash;
    let kind = if manual {
        ClusterKind::Manual
    } else if members.len() == 1 {
        ClusterKind::Singleton
    } else if members.iter().all(|&i| records[i].content_hash == first_hash) {
        ClusterKind::Exact
    } else {
        ClusterKind::Similar
    };

    Cluster {
        id: ClusterId::for_members(&paths),
        kind,
        representative: paths[0].clone(),
        members: paths,
        max_distance,
        label,
    }
}

/// Resolve every pin on a known record to its final placement.
///
/// Pins on records that are no longer in the table are ignored, and so are
/// pins whose anchor has left the table: that record clusters as if it were
/// unpinned. A chain of pins that loops cannot be resolved.
fn resolve_pins(
    pins: &PinnedAssignments,
    position: &HashMap<&Path, usize>,
) -> Result<BTreeMap<usize, Placement>, ClusterError> {
    // Pins that still point somewhere real
    let mut live: HashMap<&Path, &PinTarget> = HashMap::new();
    for (path, target) in pins.iter() {
        if !position.contains_key(path.as_path()) {
            continue;
        }
        if let PinTarget::WithRecord(anchor) = target {
            if !position.contains_key(anchor.as_path()) {
                tracing::warn!(
                    path = %path.display(),
                    anchor = %anchor.display(),
                    "Pin anchor is no longer scanned; clustering normally"
                );
                continue;
            }
        }
        live.insert(path.as_path(), target);
    }

    let mut placements = BTreeMap::new();
    for (&path, _) in &live {
        let mut visited: BTreeSet<&Path> = BTreeSet::new();
        let mut current = path;
        let placement = loop {
            if !visited.insert(current) {
                return Err(ClusterError::UnresolvablePin {
                    path: path.to_path_buf(),
                    reason: "pins form a cycle".to_string(),
                });
            }
            match live.get(current) {
                Some(PinTarget::Group(label)) => break Placement::Group(label.clone()),
                Some(PinTarget::WithRecord(target)) => current = target.as_path(),
                None => {
                    let anchor = *position.get(current).ok_or_else(|| {
                        ClusterError::UnresolvablePin {
                            path: path.to_path_buf(),
                            reason: format!("{} is not a scanned photo", current.display()),
                        }
                    })?;
                    break Placement::Anchor(anchor);
                }
            }
        };

        if let Some(&index) = position.get(path) {
            placements.insert(index, placement);
        }
    }

    Ok(placements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FingerprintParams;
    use crate::core::record::test_support::record;

    fn table(records: Vec<ImageRecord>) -> RecordTable {
        let mut table = RecordTable::new(FingerprintParams::new(8));
        for r in records {
            table.insert(r);
        }
        table
    }

    fn build(
        table: &RecordTable,
        threshold: u32,
        pins: &PinnedAssignments,
    ) -> Result<ClusterPartition, ClusterError> {
        let index = SimilarityIndex::build(table, threshold).unwrap();
        ClusterBuilder::new(threshold).build(table, &index, pins)
    }

    fn members(partition: &ClusterPartition) -> Vec<Vec<&str>> {
        partition
            .clusters()
            .iter()
            .map(|c| c.members.iter().map(|p| p.to_str().unwrap()).collect())
            .collect()
    }

    #[test]
    fn empty_table_has_no_clusters() {
        let t = table(vec![]);
        let partition = build(&t, 5, &PinnedAssignments::new()).unwrap();
        assert!(partition.is_empty());
    }

    #[test]
    fn exact_and_near_duplicates_form_one_cluster() {
        let t = table(vec![
            record("/p/a.jpg", 0xF0F0, "same"),
            record("/p/b.jpg", 0xF0F0, "same"),
            record("/p/c.jpg", 0xF0F3, "c"),
            record("/p/d.jpg", 0xFFFF_0000_0000_0000, "d"),
        ]);
        let partition = build(&t, 5, &PinnedAssignments::new()).unwrap();

        assert_eq!(
            members(&partition),
            vec![vec!["/p/a.jpg", "/p/b.jpg", "/p/c.jpg"], vec!["/p/d.jpg"]]
        );
        let group = &partition.clusters()[0];
        assert_eq!(group.kind, ClusterKind::Similar);
        assert_eq!(group.max_distance, 2);
        assert_eq!(group.representative, PathBuf::from("/p/a.jpg"));
        assert_eq!(partition.clusters()[1].kind, ClusterKind::Singleton);
        assert_eq!(partition.stats.exact_pairs, 1);
    }

    #[test]
    fn chains_are_transitive() {
        // a-b and b-c within 2, a-c at 4
        let t = table(vec![
            record("/p/a.jpg", 0b0000, "a"),
            record("/p/b.jpg", 0b0011, "b"),
            record("/p/c.jpg", 0b1111, "c"),
        ]);
        let partition = build(&t, 2, &PinnedAssignments::new()).unwrap();
        assert_eq!(partition.len(), 1);
        assert_eq!(partition.clusters()[0].max_distance, 2);
    }

    #[test]
    fn zero_threshold_joins_only_identical_content() {
        let t = table(vec![
            record("/p/a.jpg", 7, "same"),
            record("/p/b.jpg", 7, "same"),
            // Same fingerprint, different bytes
            record("/p/c.jpg", 7, "other"),
        ]);
        let partition = build(&t, 0, &PinnedAssignments::new()).unwrap();

        assert_eq!(
            members(&partition),
            vec![vec!["/p/a.jpg", "/p/b.jpg"], vec!["/p/c.jpg"]]
        );
        assert_eq!(partition.clusters()[0].kind, ClusterKind::Exact);
        assert_eq!(partition.stats.candidates_checked, 0);
    }

    #[test]
    fn identical_content_joins_even_when_fingerprints_differ() {
        let t = table(vec![
            record("/p/a.jpg", 0, "same"),
            record("/p/b.jpg", u64::MAX, "same"),
        ]);
        let partition = build(&t, 1, &PinnedAssignments::new()).unwrap();
        assert_eq!(partition.len(), 1);
        assert_eq!(partition.clusters()[0].kind, ClusterKind::Exact);
    }

    #[test]
    fn partition_covers_every_record_once() {
        let mut recs = Vec::new();
        for i in 0..40u64 {
            let word = (i / 4) * 0x0101_0101 ^ (i % 4);
            recs.push(record(&format!("/p/{:02}.jpg", i), word, &format!("{}", i)));
        }
        let t = table(recs);
        let partition = build(&t, 3, &PinnedAssignments::new()).unwrap();

        let mut seen: Vec<&PathBuf> = partition
            .clusters()
            .iter()
            .flat_map(|c| c.members.iter())
            .collect();
        assert_eq!(seen.len(), t.len());
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), t.len());
        for r in t.records() {
            assert!(partition.cluster_of(&r.path).unwrap().contains(&r.path));
        }
    }

    #[test]
    fn insertion_order_does_not_change_output() {
        let recs = vec![
            record("/p/e.jpg", 0b1, "e"),
            record("/p/a.jpg", 0b0, "a"),
            record("/p/c.jpg", 0xFF00, "c"),
            record("/p/b.jpg", 0xFF01, "b"),
        ];
        let forward = table(recs.clone());
        let backward = table(recs.into_iter().rev().collect());

        let a = build(&forward, 2, &PinnedAssignments::new()).unwrap();
        let b = build(&backward, 2, &PinnedAssignments::new()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn pinned_record_moves_to_anchor_cluster() {
        let t = table(vec![
            record("/p/a.jpg", 0, "a"),
            record("/p/b.jpg", 1, "b"),
            record("/p/z.jpg", u64::MAX, "z"),
        ]);
        let mut pins = PinnedAssignments::new();
        // b would join a; pin it next to z instead
        pins.pin(
            PathBuf::from("/p/b.jpg"),
            PinTarget::WithRecord(PathBuf::from("/p/z.jpg")),
        );
        let partition = build(&t, 3, &pins).unwrap();

        assert_eq!(
            members(&partition),
            vec![vec!["/p/a.jpg"], vec!["/p/b.jpg", "/p/z.jpg"]]
        );
        assert_eq!(partition.clusters()[0].kind, ClusterKind::Singleton);
        assert_eq!(partition.clusters()[1].kind, ClusterKind::Manual);
        assert_eq!(partition.stats.pinned, 1);
    }

    #[test]
    fn pinned_records_do_not_bridge_clusters() {
        // b sits between a and c; pinning it away must split a from c
        let t = table(vec![
            record("/p/a.jpg", 0b0000, "a"),
            record("/p/b.jpg", 0b0011, "b"),
            record("/p/c.jpg", 0b1111, "c"),
        ]);
        let mut pins = PinnedAssignments::new();
        pins.pin(PathBuf::from("/p/b.jpg"), PinTarget::Group("keep".into()));
        let partition = build(&t, 2, &pins).unwrap();

        assert_eq!(partition.len(), 3);
        let manual = partition.cluster_of(Path::new("/p/b.jpg")).unwrap();
        assert_eq!(manual.label.as_deref(), Some("keep"));
        assert_eq!(manual.kind, ClusterKind::Manual);
    }

    #[test]
    fn group_label_collects_all_its_records() {
        let t = table(vec![
            record("/p/a.jpg", 0, "a"),
            record("/p/b.jpg", u64::MAX, "b"),
            record("/p/c.jpg", 0x00FF_00FF, "c"),
        ]);
        let mut pins = PinnedAssignments::new();
        pins.pin(PathBuf::from("/p/a.jpg"), PinTarget::Group("trip".into()));
        pins.pin(PathBuf::from("/p/b.jpg"), PinTarget::Group("trip".into()));
        // Chained pin resolves through b
        pins.pin(
            PathBuf::from("/p/c.jpg"),
            PinTarget::WithRecord(PathBuf::from("/p/b.jpg")),
        );
        let partition = build(&t, 1, &pins).unwrap();

        assert_eq!(
            members(&partition),
            vec![vec!["/p/a.jpg", "/p/b.jpg", "/p/c.jpg"]]
        );
    }

    #[test]
    fn pin_cycle_is_unresolvable() {
        let t = table(vec![record("/p/a.jpg", 0, "a"), record("/p/b.jpg", 1, "b")]);
        let mut pins = PinnedAssignments::new();
        pins.pin(
            PathBuf::from("/p/a.jpg"),
            PinTarget::WithRecord(PathBuf::from("/p/b.jpg")),
        );
        pins.pin(
            PathBuf::from("/p/b.jpg"),
            PinTarget::WithRecord(PathBuf::from("/p/a.jpg")),
        );
        assert!(matches!(
            build(&t, 1, &pins),
            Err(ClusterError::UnresolvablePin { .. })
        ));
    }

    #[test]
    fn pin_to_a_departed_record_is_ignored() {
        let t = table(vec![record("/p/a.jpg", 0, "a"), record("/p/b.jpg", 1, "b")]);
        let mut pins = PinnedAssignments::new();
        pins.pin(
            PathBuf::from("/p/a.jpg"),
            PinTarget::WithRecord(PathBuf::from("/p/gone.jpg")),
        );
        let partition = build(&t, 1, &pins).unwrap();

        assert_eq!(members(&partition), vec![vec!["/p/a.jpg", "/p/b.jpg"]]);
        assert_eq!(partition.clusters()[0].kind, ClusterKind::Similar);
        assert_eq!(partition.stats.pinned, 0);
    }

    #[test]
    fn chain_through_a_dangling_pin_stops_at_that_record() {
        let t = table(vec![
            record("/p/a.jpg", 0, "a"),
            record("/p/b.jpg", u64::MAX, "b"),
        ]);
        let mut pins = PinnedAssignments::new();
        pins.pin(
            PathBuf::from("/p/a.jpg"),
            PinTarget::WithRecord(PathBuf::from("/p/b.jpg")),
        );
        pins.pin(
            PathBuf::from("/p/b.jpg"),
            PinTarget::WithRecord(PathBuf::from("/p/gone.jpg")),
        );
        let partition = build(&t, 1, &pins).unwrap();

        assert_eq!(members(&partition), vec![vec!["/p/a.jpg", "/p/b.jpg"]]);
        assert_eq!(partition.stats.pinned, 1);
    }

    #[test]
    fn pins_on_removed_records_are_ignored() {
        let t = table(vec![record("/p/a.jpg", 0, "a")]);
        let mut pins = PinnedAssignments::new();
        pins.pin(PathBuf::from("/p/gone.jpg"), PinTarget::Group("x".into()));
        let partition = build(&t, 1, &pins).unwrap();
        assert_eq!(partition.len(), 1);
        assert_eq!(partition.stats.pinned, 0);
    }

    #[test]
    fn index_missing_a_record_aborts_the_pass() {
        let t = table(vec![record("/p/a.jpg", 0, "a"), record("/p/b.jpg", 1, "b")]);
        let mut index = SimilarityIndex::build(&t, 2).unwrap();
        index.remove(Path::new("/p/b.jpg")).unwrap();

        let result = ClusterBuilder::new(2).build(&t, &index, &PinnedAssignments::new());
        assert!(matches!(
            result,
            Err(ClusterError::Index(IndexError::NotIndexed { .. }))
        ));
    }
}
