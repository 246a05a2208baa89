//! Integration tests for the scan coordinator.
//!
//! These tests drive real PNG files through scan, cluster and plan:
//! - Exact and near-duplicate grouping end to end
//! - Incremental rescans
//! - Cancellation and resume
//! - Pinned overrides

use photo_sorter::core::cancel::CancellationToken;
use photo_sorter::core::cluster::{ClusterKind, PinTarget};
use photo_sorter::core::config::{
    BucketRule, FingerprintParams, KeeperRule, PlanPolicy, SorterConfig,
};
use photo_sorter::core::coordinator::Coordinator;
use photo_sorter::core::extractor::{DecodeFailure, ImageDecoder, PixelGrid, StandardDecoder};
use photo_sorter::core::planner::{ActionKind, PlanFlag};
use photo_sorter::events::{CoordinatorEvent, CoordinatorState, Event, EventChannel};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// 8x8 pixel blocks of dark and light, shifted by `brightness`
fn write_blocks(path: &Path, brightness: u8) {
    let img = ImageBuffer::from_fn(64, 48, |x, y| {
        let base: u8 = if ((x / 8) + (y / 6)) % 2 == 0 { 40 } else { 180 };
        let v = base + brightness;
        Rgb([v, v, v])
    });
    DynamicImage::ImageRgb8(img)
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

/// Gradient getting darker to the right
fn write_fade(path: &Path) {
    let img = ImageBuffer::from_fn(64, 48, |x, _| {
        let v = (255 - x * 4) as u8;
        Rgb([v, v, v])
    });
    DynamicImage::ImageRgb8(img)
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

/// Distinct patterns: stripes of varying period
fn write_stripes(path: &Path, period: u32) {
    let img = ImageBuffer::from_fn(64, 48, |x, y| {
        let v: u8 = if ((x + y * 3) / period) % 2 == 0 { 30 } else { 220 };
        Rgb([v, v / 2, v])
    });
    DynamicImage::ImageRgb8(img)
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

struct Workspace {
    _dir: TempDir,
    base: PathBuf,
    inbox: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let inbox = base.join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        Self {
            _dir: dir,
            base,
            inbox,
        }
    }

    fn config(&self, keeper_rule: KeeperRule) -> SorterConfig {
        let mut config = SorterConfig::new(
            FingerprintParams::new(8),
            5,
            PlanPolicy {
                keeper_rule,
                bucketing: BucketRule::Flat,
                library_root: self.base.join("library"),
                quarantine_root: self.base.join("quarantine"),
            },
        );
        config.workers = Some(2);
        config
    }

    /// a.png and b.png identical, c.png a brighter copy, d.png unrelated
    fn abcd(&self) {
        write_blocks(&self.inbox.join("a.png"), 0);
        std::fs::copy(self.inbox.join("a.png"), self.inbox.join("b.png")).unwrap();
        write_blocks(&self.inbox.join("c.png"), 12);
        write_fade(&self.inbox.join("d.png"));
    }
}

fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect()
}

#[test]
fn exact_and_similar_copies_form_one_cluster() {
    let ws = Workspace::new();
    ws.abcd();

    let mut coordinator = Coordinator::builder(&ws.inbox, ws.config(KeeperRule::Path))
        .build()
        .unwrap();
    let report = coordinator.scan().unwrap();
    assert_eq!(report.extracted, 4);

    let (partition, plan) = coordinator.cluster_and_plan().unwrap();
    assert_eq!(partition.len(), 2);

    let group = partition.cluster_of(&ws.inbox.join("a.png")).unwrap();
    assert_eq!(names(&group.members), vec!["a.png", "b.png", "c.png"]);
    assert_eq!(group.kind, ClusterKind::Similar);
    assert!(group.max_distance <= 5);

    let single = partition.cluster_of(&ws.inbox.join("d.png")).unwrap();
    assert_eq!(single.kind, ClusterKind::Singleton);

    let action_of = |name: &str| {
        plan.entries
            .iter()
            .find(|e| e.source == ws.inbox.join(name))
            .map(|e| (e.action, e.destination.clone()))
            .unwrap()
    };
    assert_eq!(
        action_of("a.png"),
        (ActionKind::File, ws.base.join("library/a.png"))
    );
    assert_eq!(action_of("b.png").0, ActionKind::Quarantine);
    assert_eq!(action_of("c.png").0, ActionKind::Quarantine);
    assert_eq!(
        action_of("d.png"),
        (ActionKind::File, ws.base.join("library/d.png"))
    );
    assert!(action_of("b.png")
        .1
        .starts_with(ws.base.join("quarantine").join(group.id.to_string())));

    // PNGs carry no capture date; every entry says so
    assert_eq!(plan.flagged(PlanFlag::CaptureTimeFallback).count(), 4);

    let destinations: HashSet<_> = plan.entries.iter().map(|e| &e.destination).collect();
    assert_eq!(destinations.len(), plan.len());
}

#[test]
fn threshold_zero_only_joins_identical_files() {
    let ws = Workspace::new();
    ws.abcd();
    let mut config = ws.config(KeeperRule::Path);
    config.threshold = 0;

    let mut coordinator = Coordinator::builder(&ws.inbox, config).build().unwrap();
    coordinator.scan().unwrap();
    let partition = coordinator.cluster().unwrap();

    let group = partition.cluster_of(&ws.inbox.join("a.png")).unwrap();
    assert_eq!(names(&group.members), vec!["a.png", "b.png"]);
    assert_eq!(group.kind, ClusterKind::Exact);
    assert_eq!(partition.len(), 3);
}

#[test]
fn unchanged_rescan_extracts_nothing_and_plans_identically() {
    let ws = Workspace::new();
    ws.abcd();
    let config = ws.config(KeeperRule::Resolution);

    let mut coordinator = Coordinator::builder(&ws.inbox, config.clone())
        .build()
        .unwrap();
    coordinator.scan().unwrap();
    let (first_partition, first_plan) = coordinator.cluster_and_plan().unwrap();

    let rescan = coordinator.scan().unwrap();
    assert_eq!(rescan.extracted, 0);
    assert_eq!(rescan.changes.unchanged, 4);
    let (partition, plan) = coordinator.cluster_and_plan().unwrap();
    assert_eq!(
        serde_json::to_string(&partition).unwrap(),
        serde_json::to_string(&first_partition).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&plan).unwrap(),
        serde_json::to_string(&first_plan).unwrap()
    );

    // A full scan from nothing agrees with the incremental one
    let mut fresh = Coordinator::builder(&ws.inbox, config).build().unwrap();
    fresh.scan().unwrap();
    let (_, fresh_plan) = fresh.cluster_and_plan().unwrap();
    assert_eq!(fresh_plan.id, first_plan.id);
    assert_eq!(fresh.records(), coordinator.records());
}

/// Cancels the shared token once it has decoded `after` files
struct CancellingDecoder {
    inner: StandardDecoder,
    token: CancellationToken,
    after: usize,
    calls: AtomicUsize,
}

impl ImageDecoder for CancellingDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<PixelGrid, DecodeFailure> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
        self.inner.decode(bytes)
    }
}

#[test]
fn cancelled_scan_resumes_to_the_same_records() {
    let ws = Workspace::new();
    for i in 0..24 {
        write_stripes(&ws.inbox.join(format!("{:02}.png", i)), 2 + i);
    }
    let mut config = ws.config(KeeperRule::Path);
    config.workers = Some(1);

    let token = CancellationToken::new();
    let decoder = Arc::new(CancellingDecoder {
        inner: StandardDecoder::new(),
        token: token.clone(),
        after: 3,
        calls: AtomicUsize::new(0),
    });
    let (sender, receiver) = EventChannel::new();
    let mut coordinator = Coordinator::builder(&ws.inbox, config.clone())
        .events(sender)
        .decoder(decoder)
        .cancel_token(token)
        .build()
        .unwrap();

    let first = coordinator.scan().unwrap();
    assert!(first.cancelled);
    let partial = coordinator.records().len();
    assert!(partial >= 3 && partial < 24);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);

    let cancelled_with = receiver.drain().into_iter().find_map(|event| match event {
        Event::Coordinator(CoordinatorEvent::Cancelled { committed }) => Some(committed),
        _ => None,
    });
    assert_eq!(cancelled_with, Some(partial));

    let resumed = coordinator.scan().unwrap();
    assert!(!resumed.cancelled);
    assert_eq!(resumed.changes.unchanged, partial);
    assert_eq!(resumed.extracted, 24 - partial);

    let mut uninterrupted = Coordinator::builder(&ws.inbox, config).build().unwrap();
    uninterrupted.scan().unwrap();
    assert_eq!(uninterrupted.records(), coordinator.records());
}

#[test]
fn partition_contains_every_record_exactly_once() {
    let ws = Workspace::new();
    ws.abcd();
    for i in 0..8 {
        write_stripes(&ws.inbox.join(format!("s{}.png", i)), 3 + i * 2);
    }
    std::fs::write(ws.inbox.join("broken.jpg"), b"not an image").unwrap();

    let mut coordinator = Coordinator::builder(&ws.inbox, ws.config(KeeperRule::Resolution))
        .build()
        .unwrap();
    coordinator.scan().unwrap();
    let partition = coordinator.cluster().unwrap();

    let mut seen = HashSet::new();
    for cluster in partition.clusters() {
        for member in &cluster.members {
            assert!(seen.insert(member.clone()), "{} twice", member.display());
        }
    }
    let records: HashSet<PathBuf> = coordinator.records().records().map(|r| r.path.clone()).collect();
    assert_eq!(seen, records);
    assert!(!seen.contains(&ws.inbox.join("broken.jpg")));
    assert_eq!(coordinator.records().unreadable_len(), 1);
}

#[test]
fn pinned_record_joins_its_target_cluster() {
    let ws = Workspace::new();
    ws.abcd();

    let mut coordinator = Coordinator::builder(&ws.inbox, ws.config(KeeperRule::Path))
        .build()
        .unwrap();
    coordinator.scan().unwrap();
    coordinator
        .pin(
            ws.inbox.join("d.png"),
            PinTarget::WithRecord(ws.inbox.join("a.png")),
        )
        .unwrap();

    let partition = coordinator.cluster().unwrap();
    assert_eq!(partition.len(), 1);
    let cluster = &partition.clusters()[0];
    assert_eq!(cluster.kind, ClusterKind::Manual);
    assert_eq!(cluster.len(), 4);

    coordinator.unpin(&ws.inbox.join("d.png")).unwrap();
    assert_eq!(coordinator.cluster().unwrap().len(), 2);
}

#[test]
fn quarantine_inside_the_root_is_not_rescanned() {
    let ws = Workspace::new();
    ws.abcd();
    let mut config = ws.config(KeeperRule::Path);
    config.policy.library_root = ws.inbox.join("Library");
    config.policy.quarantine_root = ws.inbox.join("Quarantine");

    let mut coordinator = Coordinator::builder(&ws.inbox, config).build().unwrap();
    coordinator.scan().unwrap();
    let (_, plan) = coordinator.cluster_and_plan().unwrap();
    let report = coordinator.apply(&plan).unwrap();
    assert_eq!(report.failed(), 0);

    // Filed photos are found again under the library, quarantined ones are gone
    let rescan = coordinator.scan().unwrap();
    assert_eq!(rescan.extracted, 0);
    assert_eq!(rescan.changes.unchanged, 2);
    assert_eq!(rescan.changes.removed, 2);

    let (_, replan) = coordinator.cluster_and_plan().unwrap();
    assert!(replan.is_empty());
    assert_eq!(replan.summary.unchanged, 2);
}

#[test]
fn pin_survives_its_anchor_being_quarantined() {
    let ws = Workspace::new();
    ws.abcd();
    let mut config = ws.config(KeeperRule::Path);
    config.policy.library_root = ws.inbox.join("Library");
    config.policy.quarantine_root = ws.inbox.join("Quarantine");

    let mut coordinator = Coordinator::builder(&ws.inbox, config).build().unwrap();
    coordinator.scan().unwrap();
    // a.png keeps the pair {a, d}, so d.png goes to quarantine
    coordinator
        .pin(
            ws.inbox.join("a.png"),
            PinTarget::WithRecord(ws.inbox.join("d.png")),
        )
        .unwrap();

    let (_, plan) = coordinator.cluster_and_plan().unwrap();
    let report = coordinator.apply(&plan).unwrap();
    assert_eq!(report.failed(), 0);
    assert!(coordinator.pins().is_pinned(&ws.inbox.join("Library/a.png")));

    let rescan = coordinator.scan().unwrap();
    assert_eq!(rescan.changes.removed, 2);

    // The anchor is gone; a.png clusters with its identical copy again
    let partition = coordinator.cluster().unwrap();
    assert_eq!(partition.len(), 1);
    let cluster = &partition.clusters()[0];
    assert_eq!(cluster.kind, ClusterKind::Exact);
    assert_eq!(names(&cluster.members), vec!["a.png", "b.png"]);
    assert_eq!(partition.stats.pinned, 0);
}
