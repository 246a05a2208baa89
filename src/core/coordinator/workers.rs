//! Bounded worker pool for per-file extraction.
//!
//! The coordinating thread feeds a bounded job queue and commits results
//! itself; workers only ever return values.

use crate::core::cancel::CancellationToken;
use crate::core::extractor::Extractor;
use crate::core::record::{ImageRecord, UnreadableFile};
use crate::core::scanner::FileSnapshot;
use crate::error::SorterError;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// What a worker hands back for one file
#[derive(Debug)]
pub enum Extraction {
    Extracted(ImageRecord),
    Unreadable(UnreadableFile),
}

impl Extraction {
    pub fn path(&self) -> &std::path::Path {
        match self {
            Extraction::Extracted(record) => &record.path,
            Extraction::Unreadable(entry) => &entry.path,
        }
    }
}

/// How far a run got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs handed to the queue
    pub dispatched: usize,
    /// Results handed to `commit`
    pub committed: usize,
    pub cancelled: bool,
}

fn extract_one(extractor: &Extractor, job: FileSnapshot) -> Extraction {
    let attempt = catch_unwind(AssertUnwindSafe(|| extractor.extract(&job.path, job.stamp)));
    match attempt {
        Ok(Ok(record)) => Extraction::Extracted(record),
        Ok(Err(e)) => Extraction::Unreadable(UnreadableFile {
            path: job.path,
            stamp: job.stamp,
            reason: e.to_string(),
        }),
        Err(_) => Extraction::Unreadable(UnreadableFile {
            path: job.path,
            stamp: job.stamp,
            reason: "decoder panicked".to_string(),
        }),
    }
}

/// Extract every job on `workers` threads, calling `commit` on this thread
/// for each result as it arrives.
///
/// The token is checked before each dispatch and by workers before each
/// job. Extractions already running finish and are committed.
pub fn extract_all<F>(
    workers: usize,
    extractor: &Extractor,
    jobs: Vec<FileSnapshot>,
    cancel: &CancellationToken,
    mut commit: F,
) -> Result<RunSummary, SorterError>
where
    F: FnMut(Extraction),
{
    let mut summary = RunSummary {
        dispatched: 0,
        committed: 0,
        cancelled: false,
    };
    if jobs.is_empty() {
        return Ok(summary);
    }

    let workers = workers.clamp(1, jobs.len());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("extract-{}", i))
        .build()
        .map_err(|e| SorterError::WorkerPool(e.to_string()))?;

    let (job_tx, job_rx) = bounded::<FileSnapshot>(workers * 2);
    let (result_tx, result_rx) = unbounded::<Extraction>();

    pool.in_place_scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            scope.spawn(move |_| {
                for job in job_rx.iter() {
                    if cancel.is_cancelled() {
                        continue;
                    }
                    if result_tx.send(extract_one(extractor, job)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        drop(job_rx);

        let mut deliver = |extraction: Extraction| {
            summary.committed += 1;
            commit(extraction);
        };

        'dispatch: for job in jobs {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let mut pending = job;
            loop {
                match job_tx.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(back)) => {
                        pending = back;
                        match result_rx.recv_timeout(Duration::from_millis(20)) {
                            Ok(extraction) => deliver(extraction),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => break 'dispatch,
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break 'dispatch,
                }
            }
            summary.dispatched += 1;

            while let Ok(extraction) = result_rx.try_recv() {
                deliver(extraction);
            }
        }

        // Workers exit once the queue is closed and drained
        drop(job_tx);
        for extraction in result_rx.iter() {
            deliver(extraction);
        }
    });

    if cancel.is_cancelled() {
        summary.cancelled = true;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FingerprintParams;
    use crate::core::extractor::{DecodeFailure, ImageDecoder, PixelGrid};
    use crate::core::record::FileStamp;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Decodes anything not starting with "bad" to a flat grey grid
    struct FlatDecoder {
        calls: AtomicUsize,
    }

    impl ImageDecoder for FlatDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<PixelGrid, DecodeFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if bytes.starts_with(b"bad") {
                return Err(DecodeFailure("unsupported".to_string()));
            }
            PixelGrid::new(4, 4, 1, vec![128; 16])
                .ok_or_else(|| DecodeFailure("bad grid".to_string()))
        }
    }

    fn jobs(dir: &TempDir, count: usize) -> Vec<FileSnapshot> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("{:03}.jpg", i));
                let body = if i % 5 == 0 { "bad".to_string() } else { format!("img{}", i) };
                std::fs::write(&path, body).unwrap();
                let stamp = FileStamp::from_metadata(&std::fs::metadata(&path).unwrap());
                FileSnapshot { path, stamp }
            })
            .collect()
    }

    fn extractor(decoder: Arc<FlatDecoder>) -> Extractor {
        Extractor::new(FingerprintParams::new(8), decoder)
    }

    #[test]
    fn every_job_is_committed_once() {
        let dir = TempDir::new().unwrap();
        let decoder = Arc::new(FlatDecoder {
            calls: AtomicUsize::new(0),
        });
        let mut seen: Vec<PathBuf> = Vec::new();
        let mut unreadable = 0;

        let summary = extract_all(
            4,
            &extractor(decoder.clone()),
            jobs(&dir, 40),
            &CancellationToken::new(),
            |extraction| {
                if matches!(extraction, Extraction::Unreadable(_)) {
                    unreadable += 1;
                }
                seen.push(extraction.path().to_path_buf());
            },
        )
        .unwrap();

        assert_eq!(summary.dispatched, 40);
        assert_eq!(summary.committed, 40);
        assert!(!summary.cancelled);
        assert_eq!(unreadable, 8);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 40);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn cancelled_before_start_dispatches_nothing() {
        let dir = TempDir::new().unwrap();
        let decoder = Arc::new(FlatDecoder {
            calls: AtomicUsize::new(0),
        });
        let token = CancellationToken::new();
        token.cancel();

        let summary = extract_all(2, &extractor(decoder.clone()), jobs(&dir, 10), &token, |_| {})
            .unwrap();
        assert_eq!(summary.dispatched, 0);
        assert_eq!(summary.committed, 0);
        assert!(summary.cancelled);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelling_mid_run_keeps_committed_results() {
        let dir = TempDir::new().unwrap();
        let decoder = Arc::new(FlatDecoder {
            calls: AtomicUsize::new(0),
        });
        let token = CancellationToken::new();
        let mut committed = 0;

        let summary = extract_all(2, &extractor(decoder), jobs(&dir, 200), &token, |_| {
            committed += 1;
            if committed == 3 {
                token.cancel();
            }
        })
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.committed, committed);
        assert!(committed >= 3);
        assert!(summary.committed < 200);
    }

    #[test]
    fn empty_job_list_is_a_no_op() {
        let decoder = Arc::new(FlatDecoder {
            calls: AtomicUsize::new(0),
        });
        let summary =
            extract_all(4, &extractor(decoder), Vec::new(), &CancellationToken::new(), |_| {})
                .unwrap();
        assert_eq!(summary.committed, 0);
    }
}
