//! # Coordinator Module
//!
//! Owns the record table, the similarity index and the pinned assignments,
//! and drives every other component through one state machine:
//!
//! ```text
//! Idle -> Scanning -> Extracting -> Idle
//! Idle -> Clustering -> Idle
//! Idle -> Planning -> Idle
//! Idle -> Executing -> Idle
//! ```
//!
//! Only the coordinating thread mutates state. Extraction workers return
//! values that are committed here, in arrival order.
//!
//! ## Example
//! ```rust,ignore
//! let mut coordinator = Coordinator::builder(root, config)
//!     .store(Box::new(SqliteRecordStore::new(&state_path)))
//!     .events(sender)
//!     .build()?;
//!
//! coordinator.scan()?;
//! let partition = coordinator.cluster()?;
//! let plan = coordinator.plan(&partition)?;
//! coordinator.save()?;
//! ```

mod workers;

pub use workers::{extract_all, Extraction, RunSummary};

use crate::core::cancel::CancellationToken;
use crate::core::cluster::{ClusterBuilder, ClusterPartition, PinTarget, PinnedAssignments};
use crate::core::config::SorterConfig;
use crate::core::executor::{ExecutionReport, PlanExecutor};
use crate::core::extractor::{Extractor, ImageDecoder, StandardDecoder};
use crate::core::index::SimilarityIndex;
use crate::core::planner::{PlanFlag, SortPlan, SortPlanner};
use crate::core::record::{FileStamp, RecordTable};
use crate::core::scanner::{FileSnapshot, ScanOptions, WalkDirScanner};
use crate::core::store::{InMemoryRecordStore, RecordStore};
use crate::error::{IndexError, ScanError, SorterError};
use crate::events::{
    null_sender, ChangeSummary, ClusterEvent, CoordinatorEvent, CoordinatorState, Event,
    EventSender, ExecuteEvent, ExtractEvent, ExtractProgress, PlanEvent, ScanEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// What one scan did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub changes: ChangeSummary,
    /// Files extracted successfully in this scan
    pub extracted: usize,
    /// Files that failed to decode in this scan
    pub unreadable: usize,
    /// Entries discarded at load because of a fingerprint parameter change
    pub discarded: usize,
    pub cancelled: bool,
    /// Non-fatal traversal errors
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Builder for a coordinator
pub struct CoordinatorBuilder {
    root: PathBuf,
    config: SorterConfig,
    store: Option<Box<dyn RecordStore>>,
    events: Option<EventSender>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    cancel: Option<CancellationToken>,
}

impl CoordinatorBuilder {
    /// Persist state through this store (default: in memory only)
    pub fn store(mut self, store: Box<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Report progress through this sender (default: discarded)
    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Decode images with this capability (default: `StandardDecoder`)
    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Share a cancellation token with the caller
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate the configuration and load the last saved state
    pub fn build(self) -> Result<Coordinator, SorterError> {
        let mut config = self.config;
        config.validate()?;
        config.policy.library_root = absolute(&config.policy.library_root);
        config.policy.quarantine_root = absolute(&config.policy.quarantine_root);

        let store = self
            .store
            .unwrap_or_else(|| Box::new(InMemoryRecordStore::new()));
        let snapshot = store.load(config.fingerprint)?;
        if snapshot.discarded > 0 {
            tracing::info!(
                discarded = snapshot.discarded,
                "Saved records use other fingerprint parameters; all files will be re-extracted"
            );
        }

        let index = SimilarityIndex::build(&snapshot.table, config.threshold)?;
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(StandardDecoder::new()));

        Ok(Coordinator {
            extractor: Extractor::new(config.fingerprint, decoder),
            root: self.root,
            config,
            state: CoordinatorState::Idle,
            table: snapshot.table,
            index,
            pins: snapshot.pins,
            discarded: snapshot.discarded,
            store,
            events: self.events.unwrap_or_else(null_sender),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// The scan coordinator
pub struct Coordinator {
    root: PathBuf,
    config: SorterConfig,
    state: CoordinatorState,
    table: RecordTable,
    index: SimilarityIndex,
    pins: PinnedAssignments,
    /// Reported by the next scan, then cleared
    discarded: usize,
    extractor: Extractor,
    store: Box<dyn RecordStore>,
    events: EventSender,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn builder(root: impl Into<PathBuf>, config: SorterConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            root: root.into(),
            config,
            store: None,
            events: None,
            decoder: None,
            cancel: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SorterConfig {
        &self.config
    }

    /// Read-only view of the record table
    pub fn records(&self) -> &RecordTable {
        &self.table
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn pins(&self) -> &PinnedAssignments {
        &self.pins
    }

    /// Token that cancels the running scan. Clones share the flag.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop reporting events. The sender is dropped, so a listener
    /// iterating the receiver finishes.
    pub fn detach_events(&mut self) {
        self.events = null_sender();
    }

    /// Override cluster membership for the next clustering pass
    pub fn pin(&mut self, path: PathBuf, target: PinTarget) -> Result<(), SorterError> {
        self.ensure_idle()?;
        self.pins.pin(path, target);
        Ok(())
    }

    pub fn unpin(&mut self, path: &Path) -> Result<Option<PinTarget>, SorterError> {
        self.ensure_idle()?;
        Ok(self.pins.unpin(path))
    }

    /// Traverse the root, extract new and changed files and commit them.
    ///
    /// Files whose size and modification time match the table are trusted
    /// without re-extraction. On cancellation every committed record is
    /// kept and the report says `cancelled`.
    pub fn scan(&mut self) -> Result<ScanReport, SorterError> {
        self.ensure_idle()?;
        let start = Instant::now();
        let mut report = ScanReport {
            discarded: std::mem::take(&mut self.discarded),
            ..ScanReport::default()
        };

        self.enter(CoordinatorState::Scanning);
        let scanner = WalkDirScanner::new(ScanOptions::from_config(&self.config));
        let outcome = match scanner.scan(&self.root, &self.cancel, &self.events) {
            Ok(outcome) => outcome,
            Err(ScanError::Cancelled) => {
                report.cancelled = true;
                return Ok(self.finish_scan(report, start, 0));
            }
            Err(e) => {
                self.enter(CoordinatorState::Idle);
                return Err(e.into());
            }
        };
        report.errors = outcome.errors.iter().map(|e| e.to_string()).collect();

        let (jobs, changes) = match self.reconcile(&outcome.files) {
            Ok(diff) => diff,
            Err(e) => return Err(self.abort(e.into())),
        };
        tracing::info!(
            added = changes.added,
            modified = changes.modified,
            removed = changes.removed,
            unchanged = changes.unchanged,
            "Change set computed"
        );
        self.events
            .send(Event::Scan(ScanEvent::Completed(changes.clone())));
        report.changes = changes;

        self.enter(CoordinatorState::Extracting);
        let total = jobs.len();
        self.events
            .send(Event::Extract(ExtractEvent::Started { total }));

        let mut processed = 0usize;
        let mut failure: Option<IndexError> = None;
        let run = extract_all(
            self.config.worker_count(),
            &self.extractor,
            jobs,
            &self.cancel,
            |extraction| {
                processed += 1;
                let current_path = extraction.path().to_path_buf();
                match extraction {
                    Extraction::Extracted(record) => {
                        match self
                            .index
                            .insert(record.path.clone(), record.fingerprint.clone())
                        {
                            Ok(()) => {
                                self.table.insert(record);
                                report.extracted += 1;
                            }
                            Err(e) => {
                                failure.get_or_insert(e);
                            }
                        }
                    }
                    Extraction::Unreadable(entry) => {
                        tracing::warn!(path = %entry.path.display(), "{}", entry.reason);
                        self.events.send(Event::Extract(ExtractEvent::Unreadable {
                            path: entry.path.clone(),
                            message: entry.reason.clone(),
                        }));
                        self.table.mark_unreadable(entry);
                        report.unreadable += 1;
                    }
                }
                self.events
                    .send(Event::Extract(ExtractEvent::Progress(ExtractProgress {
                        processed,
                        total,
                        current_path,
                    })));
            },
        );

        let run = match run {
            Ok(run) => run,
            Err(e) => return Err(self.abort(e)),
        };
        if let Some(e) = failure {
            return Err(self.abort(e.into()));
        }

        report.cancelled = run.cancelled;
        self.events.send(Event::Extract(ExtractEvent::Completed {
            extracted: report.extracted,
            unreadable: report.unreadable,
            cancelled: run.cancelled,
        }));
        Ok(self.finish_scan(report, start, run.committed))
    }

    /// Group every readable record at the configured threshold
    pub fn cluster(&mut self) -> Result<ClusterPartition, SorterError> {
        self.ensure_idle()?;
        self.enter(CoordinatorState::Clustering);
        self.events.send(Event::Cluster(ClusterEvent::Started {
            records: self.table.len(),
            threshold: self.config.threshold,
        }));

        let built =
            ClusterBuilder::new(self.config.threshold).build(&self.table, &self.index, &self.pins);
        let partition = match built {
            Ok(partition) => partition,
            Err(e) => return Err(self.abort(e.into())),
        };

        self.events.send(Event::Cluster(ClusterEvent::Completed {
            clusters: partition.len(),
            duplicate_groups: partition.duplicate_groups().count(),
            candidates_checked: partition.stats.candidates_checked,
        }));
        self.enter(CoordinatorState::Idle);
        Ok(partition)
    }

    /// Compute the sort plan for a partition of the current table
    pub fn plan(&mut self, partition: &ClusterPartition) -> Result<SortPlan, SorterError> {
        self.ensure_idle()?;
        self.enter(CoordinatorState::Planning);
        self.events.send(Event::Plan(PlanEvent::Started {
            clusters: partition.len(),
        }));

        let planned = SortPlanner::new(&self.config.policy).plan(partition, &self.table);
        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => return Err(self.abort(e.into())),
        };

        self.events.send(Event::Plan(PlanEvent::Completed {
            plan_id: plan.id.clone(),
            entries: plan.len(),
            fallbacks: plan.flagged(PlanFlag::CaptureTimeFallback).count(),
        }));
        self.enter(CoordinatorState::Idle);
        Ok(plan)
    }

    /// Cluster then plan in one call
    pub fn cluster_and_plan(&mut self) -> Result<(ClusterPartition, SortPlan), SorterError> {
        let partition = self.cluster()?;
        let plan = self.plan(&partition)?;
        Ok((partition, plan))
    }

    /// Apply a plan. Each successful move re-keys the record, its index
    /// entry and its pin before the next entry runs.
    pub fn apply(&mut self, plan: &SortPlan) -> Result<ExecutionReport, SorterError> {
        self.ensure_idle()?;
        self.enter(CoordinatorState::Executing);
        let total = plan.len();
        self.events
            .send(Event::Execute(ExecuteEvent::Started { entries: total }));

        let report = PlanExecutor::execute(plan, |entry, outcome| {
            if outcome.succeeded() {
                follow_move(
                    &mut self.table,
                    &mut self.index,
                    &mut self.pins,
                    &entry.source,
                    &entry.destination,
                );
            }
            self.events.send(Event::Execute(ExecuteEvent::EntryFinished {
                index: outcome.index,
                total,
                source: outcome.source.clone(),
                succeeded: outcome.succeeded(),
            }));
        });

        self.events.send(Event::Execute(ExecuteEvent::Completed {
            applied: report.applied(),
            failed: report.failed(),
        }));
        self.enter(CoordinatorState::Idle);
        Ok(report)
    }

    /// Persist the record table and pins
    pub fn save(&self) -> Result<(), SorterError> {
        self.ensure_idle()?;
        self.store.save(&self.table, &self.pins)?;
        tracing::debug!(
            records = self.table.len(),
            unreadable = self.table.unreadable_len(),
            "State saved"
        );
        Ok(())
    }

    /// Drop every record and the saved state
    pub fn reset(&mut self) -> Result<(), SorterError> {
        self.ensure_idle()?;
        self.store.clear()?;
        self.table = RecordTable::new(self.config.fingerprint);
        self.index = SimilarityIndex::new(self.config.fingerprint, self.config.threshold);
        self.pins.clear();
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), SorterError> {
        if self.state != CoordinatorState::Idle {
            return Err(SorterError::Busy {
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn enter(&mut self, state: CoordinatorState) {
        tracing::debug!(from = %self.state, to = %state, "state");
        self.state = state;
        self.events.state(state);
    }

    /// Report a pass-level failure and return to Idle. Committed state is
    /// left as it was.
    fn abort(&mut self, error: SorterError) -> SorterError {
        tracing::error!(state = %self.state, "Pass aborted: {}", error);
        self.events
            .send(Event::Coordinator(CoordinatorEvent::PassAborted {
                message: error.to_string(),
            }));
        self.enter(CoordinatorState::Idle);
        error
    }

    fn finish_scan(&mut self, mut report: ScanReport, start: Instant, committed: usize) -> ScanReport {
        if report.cancelled {
            tracing::info!(committed, "Scan cancelled");
            self.events
                .send(Event::Coordinator(CoordinatorEvent::Cancelled { committed }));
            self.cancel.reset();
        }
        report.duration_ms = start.elapsed().as_millis() as u64;
        self.enter(CoordinatorState::Idle);
        report
    }

    /// Diff the traversal against the table. Removed and modified entries
    /// leave the table and index here; the returned jobs are what must be
    /// extracted.
    fn reconcile(
        &mut self,
        files: &[FileSnapshot],
    ) -> Result<(Vec<FileSnapshot>, ChangeSummary), IndexError> {
        let mut changes = ChangeSummary::default();
        let seen: HashSet<&Path> = files.iter().map(|f| f.path.as_path()).collect();

        for path in self.table.known_paths() {
            if !seen.contains(path.as_path()) {
                self.forget(&path)?;
                changes.removed += 1;
            }
        }

        let mut jobs = Vec::new();
        for file in files {
            match self.table.stamp_of(&file.path) {
                Some(stamp) if stamp == file.stamp => changes.unchanged += 1,
                Some(_) => {
                    self.forget(&file.path)?;
                    changes.modified += 1;
                    jobs.push(file.clone());
                }
                None => {
                    changes.added += 1;
                    jobs.push(file.clone());
                }
            }
        }
        Ok((jobs, changes))
    }

    /// The index entry goes first; if it cannot be removed the table row
    /// stays too
    fn forget(&mut self, path: &Path) -> Result<(), IndexError> {
        if self.table.get(path).is_some() {
            self.index.remove(path)?;
        }
        self.table.remove(path);
        Ok(())
    }
}

/// Re-key everything that refers to a moved file. The stamp is refreshed
/// from the new location so the next scan trusts the record.
fn follow_move(
    table: &mut RecordTable,
    index: &mut SimilarityIndex,
    pins: &mut PinnedAssignments,
    from: &Path,
    to: &Path,
) {
    if table.get(from).is_none() {
        tracing::warn!(path = %from.display(), "Moved file has no record to follow it");
        return;
    }
    // Left in place, the old row is reconciled as removed on the next scan
    if let Err(e) = index.rename(from, to.to_path_buf()) {
        tracing::error!("{}", e);
        return;
    }
    table.relocate(from, to);
    pins.relocate(from, to);
    if let Ok(metadata) = std::fs::metadata(to) {
        table.set_stamp(to, FileStamp::from_metadata(&metadata));
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
