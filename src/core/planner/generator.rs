//! Plan generator: keeper ranking, bucketing and collision avoidance.

use super::types::*;
use crate::core::cluster::{Cluster, ClusterPartition};
use crate::core::config::{BucketRule, FingerprintParams, KeeperRule, PlanPolicy};
use crate::core::record::{ImageRecord, RecordTable};
use crate::error::PlanError;
use chrono::{Datelike, NaiveDateTime};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for plan ids
const PLAN_NAMESPACE: Uuid = Uuid::from_u128(0x8c1e_72d4_05a9_4f3b_b6e2_19d7_4a60_c35f);

/// Turns a cluster partition into a sort plan
pub struct SortPlanner<'a> {
    policy: &'a PlanPolicy,
}

impl<'a> SortPlanner<'a> {
    pub fn new(policy: &'a PlanPolicy) -> Self {
        Self { policy }
    }

    /// Compute the complete plan.
    ///
    /// Every current record path is reserved, so no entry lands on a file
    /// that exists or will still exist when the executor reaches it. A
    /// record whose destination is its own path gets no entry.
    pub fn plan(
        &self,
        partition: &ClusterPartition,
        table: &RecordTable,
    ) -> Result<SortPlan, PlanError> {
        let mut taken: HashSet<PathBuf> = table.known_paths().into_iter().collect();
        let mut counters: HashMap<PathBuf, usize> = HashMap::new();
        let mut entries = Vec::new();
        let mut summary = PlanSummary {
            clusters: partition.len(),
            duplicate_groups: partition.duplicate_groups().count(),
            ..PlanSummary::default()
        };

        for cluster in partition.clusters() {
            let ranked = self.rank_members(cluster, table)?;

            for (position, record) in ranked.into_iter().enumerate() {
                let (action, natural) = if position == 0 {
                    (ActionKind::File, self.library_destination(record))
                } else {
                    (
                        ActionKind::Quarantine,
                        self.policy
                            .quarantine_root
                            .join(cluster.id.to_string())
                            .join(file_name(&record.path)),
                    )
                };

                let mut flags = Vec::new();
                let destination = if natural == record.path {
                    natural
                } else if taken.contains(&natural) {
                    flags.push(PlanFlag::Renamed);
                    unique_path(&natural, &record.path, &taken, &mut counters)
                } else {
                    natural
                };

                if destination == record.path {
                    summary.unchanged += 1;
                    continue;
                }

                if record.capture.is_fallback() {
                    flags.insert(0, PlanFlag::CaptureTimeFallback);
                    summary.capture_fallbacks += 1;
                }
                if flags.contains(&PlanFlag::Renamed) {
                    summary.renamed += 1;
                }
                match action {
                    ActionKind::File => summary.filed += 1,
                    ActionKind::Quarantine => {
                        summary.quarantined += 1;
                        summary.bytes_quarantined += record.stamp.size;
                    }
                }

                taken.insert(destination.clone());
                entries.push(PlanEntry {
                    source: record.path.clone(),
                    destination,
                    action,
                    cluster_id: cluster.id,
                    size_bytes: record.stamp.size,
                    flags,
                });
            }
        }

        verify(&entries)?;

        let plan = SortPlan {
            id: plan_id(table.params(), partition.threshold, &entries),
            fingerprint: table.params(),
            threshold: partition.threshold,
            policy: self.policy.clone(),
            entries,
            summary,
        };
        tracing::info!(
            plan = %plan.id,
            entries = plan.len(),
            fallbacks = summary.capture_fallbacks,
            "Plan ready"
        );
        Ok(plan)
    }

    /// Members in keeper order: the first is the keeper
    fn rank_members<'t>(
        &self,
        cluster: &Cluster,
        table: &'t RecordTable,
    ) -> Result<Vec<&'t ImageRecord>, PlanError> {
        let mut records = cluster
            .members
            .iter()
            .map(|path| {
                table
                    .get(path)
                    .ok_or_else(|| PlanError::UnknownRecord { path: path.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rule = self.policy.keeper_rule;
        records.sort_by(|a, b| keeper_order(rule, a, b));
        Ok(records)
    }

    fn library_destination(&self, record: &ImageRecord) -> PathBuf {
        let mut dir = self.policy.library_root.clone();
        for component in bucket_components(self.policy.bucketing, record.capture.at) {
            dir.push(component);
        }
        dir.join(file_name(&record.path))
    }
}

/// Ordering where the preferred keeper sorts first
pub fn keeper_order(rule: KeeperRule, a: &ImageRecord, b: &ImageRecord) -> Ordering {
    let by_pixels = b.pixel_count().cmp(&a.pixel_count());
    let by_capture = a.capture.at.cmp(&b.capture.at);
    let by_path = a.path.cmp(&b.path);

    match rule {
        KeeperRule::Resolution => by_pixels.then(by_capture).then(by_path),
        KeeperRule::CaptureTime => by_capture.then(by_pixels).then(by_path),
        KeeperRule::Path => by_path,
    }
}

/// Folder components for a capture time
pub fn bucket_components(rule: BucketRule, at: NaiveDateTime) -> Vec<String> {
    match rule {
        BucketRule::Year => vec![format!("{:04}", at.year())],
        BucketRule::YearMonth => vec![format!("{:04}", at.year()), format!("{:02}", at.month())],
        BucketRule::Flat => Vec::new(),
    }
}

fn file_name(path: &Path) -> OsString {
    path.file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("unnamed"))
}

/// Next free `stem_N.ext` next to `path`.
///
/// Counters remember the last suffix handed out per base path, so a burst
/// of same-named files does not rescan from 1 each time. A candidate equal
/// to `source` is returned as-is: the file already sits at a valid name.
fn unique_path(
    path: &Path,
    source: &Path,
    taken: &HashSet<PathBuf>,
    counters: &mut HashMap<PathBuf, usize>,
) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("file"));
    let ext = path.extension().map(|e| e.to_os_string());
    let parent = path.parent().unwrap_or(Path::new(""));

    let counter = counters.entry(path.to_path_buf()).or_insert(1);
    loop {
        let mut name = stem.clone();
        name.push(format!("_{}", counter));
        if let Some(ext) = &ext {
            name.push(".");
            name.push(ext);
        }
        let candidate = parent.join(name);

        if candidate == source {
            return candidate;
        }
        *counter += 1;
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
}

/// Reject plans with shared destinations or moves onto themselves
fn verify(entries: &[PlanEntry]) -> Result<(), PlanError> {
    let mut seen: HashSet<&Path> = HashSet::with_capacity(entries.len());
    for entry in entries {
        if entry.source == entry.destination {
            return Err(PlanError::SelfMove {
                path: entry.source.clone(),
            });
        }
        if !seen.insert(entry.destination.as_path()) {
            return Err(PlanError::Collision {
                destination: entry.destination.clone(),
            });
        }
    }
    Ok(())
}

fn plan_id(params: FingerprintParams, threshold: u32, entries: &[PlanEntry]) -> String {
    let mut name = format!("{}:{}\0", params.grid_size, threshold).into_bytes();
    for entry in entries {
        name.extend_from_slice(entry.source.as_os_str().as_encoded_bytes());
        name.push(0);
        name.extend_from_slice(entry.destination.as_os_str().as_encoded_bytes());
        name.push(0);
        name.extend_from_slice(entry.action.to_string().as_bytes());
        name.push(0);
    }
    Uuid::new_v5(&PLAN_NAMESPACE, &name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::{ClusterBuilder, PinnedAssignments};
    use crate::core::config::FingerprintParams;
    use crate::core::extractor::CaptureSource;
    use crate::core::index::SimilarityIndex;
    use crate::core::record::test_support::record;
    use chrono::NaiveDate;

    fn policy(rule: KeeperRule, bucketing: BucketRule) -> PlanPolicy {
        PlanPolicy {
            keeper_rule: rule,
            bucketing,
            library_root: PathBuf::from("/lib"),
            quarantine_root: PathBuf::from("/dupes"),
        }
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn setup(records: Vec<ImageRecord>, threshold: u32) -> (RecordTable, ClusterPartition) {
        let mut table = RecordTable::new(FingerprintParams::new(8));
        for r in records {
            table.insert(r);
        }
        let index = SimilarityIndex::build(&table, threshold).unwrap();
        let partition = ClusterBuilder::new(threshold)
            .build(&table, &index, &PinnedAssignments::new())
            .unwrap();
        (table, partition)
    }

    fn entry<'p>(plan: &'p SortPlan, source: &str) -> &'p PlanEntry {
        plan.entries
            .iter()
            .find(|e| e.source == Path::new(source))
            .unwrap()
    }

    #[test]
    fn bucket_components_per_rule() {
        let t = at(2024, 1, 15);
        assert_eq!(bucket_components(BucketRule::Year, t), vec!["2024"]);
        assert_eq!(bucket_components(BucketRule::YearMonth, t), vec!["2024", "01"]);
        assert!(bucket_components(BucketRule::Flat, t).is_empty());
    }

    #[test]
    fn resolution_rule_keeps_largest_image() {
        let mut small = record("/in/a.jpg", 0, "a");
        small.width = 640;
        small.height = 480;
        let mut large = record("/in/b.jpg", 1, "b");
        large.width = 4000;
        large.height = 3000;
        let (table, partition) = setup(vec![small, large], 3);

        let plan = SortPlanner::new(&policy(KeeperRule::Resolution, BucketRule::YearMonth))
            .plan(&partition, &table)
            .unwrap();

        let keeper = entry(&plan, "/in/b.jpg");
        assert_eq!(keeper.action, ActionKind::File);
        assert_eq!(keeper.destination, PathBuf::from("/lib/2023/05/b.jpg"));

        let dupe = entry(&plan, "/in/a.jpg");
        assert_eq!(dupe.action, ActionKind::Quarantine);
        assert_eq!(
            dupe.destination,
            PathBuf::from("/dupes")
                .join(partition.clusters()[0].id.to_string())
                .join("a.jpg")
        );
        assert_eq!(plan.summary.quarantined, 1);
        assert_eq!(plan.summary.bytes_quarantined, 1);
    }

    #[test]
    fn resolution_ties_break_on_capture_then_path() {
        let mut late = record("/in/a.jpg", 0, "a");
        late.capture.at = at(2024, 6, 1);
        let mut early = record("/in/b.jpg", 0, "b");
        early.capture.at = at(2020, 6, 1);
        let same_time = record("/in/c.jpg", 0, "c");
        let mut also_same = record("/in/d.jpg", 0, "d");
        also_same.capture = same_time.capture;

        assert_eq!(
            keeper_order(KeeperRule::Resolution, &early, &late),
            Ordering::Less
        );
        assert_eq!(
            keeper_order(KeeperRule::Resolution, &same_time, &also_same),
            Ordering::Less
        );
    }

    #[test]
    fn capture_time_rule_prefers_earliest() {
        let mut old_small = record("/in/z.jpg", 0, "z");
        old_small.capture.at = at(2010, 1, 1);
        old_small.width = 10;
        let new_large = record("/in/a.jpg", 0, "a");

        assert_eq!(
            keeper_order(KeeperRule::CaptureTime, &old_small, &new_large),
            Ordering::Less
        );
        assert_eq!(
            keeper_order(KeeperRule::Path, &old_small, &new_large),
            Ordering::Greater
        );
    }

    #[test]
    fn colliding_keepers_get_suffixes() {
        // Same filename, different folders, unrelated images
        let (table, partition) = setup(
            vec![
                record("/in/one/IMG_0001.jpg", 0, "1"),
                record("/in/two/IMG_0001.jpg", u64::MAX, "2"),
                record("/in/three/IMG_0001.jpg", 0xFFFF_FFFF, "3"),
            ],
            2,
        );
        let plan = SortPlanner::new(&policy(KeeperRule::Resolution, BucketRule::Year))
            .plan(&partition, &table)
            .unwrap();

        let mut destinations: Vec<&Path> =
            plan.entries.iter().map(|e| e.destination.as_path()).collect();
        destinations.sort();
        assert_eq!(
            destinations,
            vec![
                Path::new("/lib/2023/IMG_0001.jpg"),
                Path::new("/lib/2023/IMG_0001_1.jpg"),
                Path::new("/lib/2023/IMG_0001_2.jpg"),
            ]
        );
        assert_eq!(plan.summary.renamed, 2);
        assert_eq!(plan.flagged(PlanFlag::Renamed).count(), 2);
    }

    #[test]
    fn destination_never_overwrites_an_existing_record() {
        let (table, partition) = setup(
            vec![
                // Already filed, unrelated image with the same name
                record("/lib/2023/05/a.jpg", 0, "filed"),
                record("/in/a.jpg", u64::MAX, "new"),
            ],
            2,
        );
        let plan = SortPlanner::new(&policy(KeeperRule::Resolution, BucketRule::YearMonth))
            .plan(&partition, &table)
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.summary.unchanged, 1);
        assert_eq!(
            plan.entries[0].destination,
            PathBuf::from("/lib/2023/05/a_1.jpg")
        );
    }

    #[test]
    fn replanning_after_apply_is_empty() {
        let (table, partition) = setup(
            vec![
                record("/lib/2023/05/a.jpg", 0, "x"),
                record("/lib/2023/05/a_1.jpg", u64::MAX, "y"),
            ],
            2,
        );
        let plan = SortPlanner::new(&policy(KeeperRule::Resolution, BucketRule::YearMonth))
            .plan(&partition, &table)
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary.unchanged, 2);
    }

    #[test]
    fn fallback_capture_is_flagged() {
        let mut undated = record("/in/a.jpg", 0, "a");
        undated.capture.source = CaptureSource::FileModified;
        let (table, partition) = setup(vec![undated], 2);
        let plan = SortPlanner::new(&policy(KeeperRule::Resolution, BucketRule::Flat))
            .plan(&partition, &table)
            .unwrap();

        assert_eq!(plan.entries[0].destination, PathBuf::from("/lib/a.jpg"));
        assert!(plan.entries[0].has_flag(PlanFlag::CaptureTimeFallback));
        assert_eq!(plan.summary.capture_fallbacks, 1);
    }

    #[test]
    fn planning_is_deterministic() {
        let records = vec![
            record("/in/a.jpg", 0, "same"),
            record("/in/b.jpg", 0, "same"),
            record("/in/c.jpg", 3, "c"),
            record("/in/d.jpg", u64::MAX, "d"),
        ];
        let p = policy(KeeperRule::Resolution, BucketRule::YearMonth);
        let (t1, c1) = setup(records.clone(), 5);
        let (t2, c2) = setup(records.into_iter().rev().collect(), 5);

        let a = SortPlanner::new(&p).plan(&c1, &t1).unwrap();
        let b = SortPlanner::new(&p).plan(&c2, &t2).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn unknown_member_is_rejected() {
        let (table, partition) = setup(vec![record("/in/a.jpg", 0, "a")], 1);
        let empty = RecordTable::new(table.params());
        let result = SortPlanner::new(&policy(KeeperRule::Path, BucketRule::Flat))
            .plan(&partition, &empty);
        assert!(matches!(result, Err(PlanError::UnknownRecord { .. })));
    }

    #[test]
    fn verify_catches_collisions_and_self_moves() {
        let id = crate::core::cluster::ClusterId::for_members(&[PathBuf::from("/a")]);
        let make = |s: &str, d: &str| PlanEntry {
            source: PathBuf::from(s),
            destination: PathBuf::from(d),
            action: ActionKind::File,
            cluster_id: id,
            size_bytes: 0,
            flags: vec![],
        };
        assert!(matches!(
            verify(&[make("/a", "/x"), make("/b", "/x")]),
            Err(PlanError::Collision { .. })
        ));
        assert!(matches!(
            verify(&[make("/a", "/a")]),
            Err(PlanError::SelfMove { .. })
        ));
        assert!(verify(&[make("/a", "/x"), make("/b", "/y")]).is_ok());
    }
}
