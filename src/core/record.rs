//! The record table: one entry per scanned file, keyed by absolute path.
//!
//! Owned by the scan coordinator. Every other component borrows it
//! read-only; only the coordinator (and the executor callback it drives)
//! mutates it.

use crate::core::config::FingerprintParams;
use crate::core::extractor::{CaptureTime, ContentHash, Fingerprint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size and modification time of a file, used to skip re-extraction.
///
/// A file rewritten without changing either is not noticed; that staleness
/// is an accepted limitation of incremental scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStamp {
    pub size: u64,
    pub modified_secs: i64,
    pub modified_nanos: u32,
}

impl FileStamp {
    pub fn new(size: u64, modified: SystemTime) -> Self {
        let (modified_secs, modified_nanos) = match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                (-(d.as_secs() as i64), 0)
            }
        };
        Self {
            size,
            modified_secs,
            modified_nanos,
        }
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self::new(
            metadata.len(),
            metadata.modified().unwrap_or(UNIX_EPOCH),
        )
    }

    pub fn modified_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.modified_secs, self.modified_nanos).unwrap_or_default()
    }
}

/// A successfully extracted photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub stamp: FileStamp,
    pub width: u32,
    pub height: u32,
    pub capture: CaptureTime,
    pub fingerprint: Fingerprint,
    pub content_hash: ContentHash,
}

impl ImageRecord {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A file that could not be decoded, kept so an unchanged broken file is
/// not retried on every scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadableFile {
    pub path: PathBuf,
    pub stamp: FileStamp,
    pub reason: String,
}

/// Either kind of entry, as removed from the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovedEntry {
    Record(ImageRecord),
    Unreadable(UnreadableFile),
}

/// All known files under the scan root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTable {
    params: FingerprintParams,
    records: BTreeMap<PathBuf, ImageRecord>,
    unreadable: BTreeMap<PathBuf, UnreadableFile>,
}

impl RecordTable {
    pub fn new(params: FingerprintParams) -> Self {
        Self {
            params,
            records: BTreeMap::new(),
            unreadable: BTreeMap::new(),
        }
    }

    /// Fingerprint parameters every record in this table was extracted with
    pub fn params(&self) -> FingerprintParams {
        self.params
    }

    pub fn get(&self, path: &Path) -> Option<&ImageRecord> {
        self.records.get(path)
    }

    pub fn unreadable(&self) -> impl Iterator<Item = &UnreadableFile> {
        self.unreadable.values()
    }

    /// Records in path order
    pub fn records(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn unreadable_len(&self) -> usize {
        self.unreadable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.unreadable.is_empty()
    }

    /// Stamp of whatever entry exists for the path
    pub fn stamp_of(&self, path: &Path) -> Option<FileStamp> {
        self.records
            .get(path)
            .map(|r| r.stamp)
            .or_else(|| self.unreadable.get(path).map(|u| u.stamp))
    }

    /// Every known path, readable or not, in order
    pub fn known_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .records
            .keys()
            .chain(self.unreadable.keys())
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Insert or replace a record. Returns the previous record, if any.
    pub fn insert(&mut self, record: ImageRecord) -> Option<ImageRecord> {
        self.unreadable.remove(&record.path);
        self.records.insert(record.path.clone(), record)
    }

    /// Mark a file unreadable. Returns the record it replaces, if any.
    pub fn mark_unreadable(&mut self, entry: UnreadableFile) -> Option<ImageRecord> {
        let previous = self.records.remove(&entry.path);
        self.unreadable.insert(entry.path.clone(), entry);
        previous
    }

    pub fn remove(&mut self, path: &Path) -> Option<RemovedEntry> {
        if let Some(record) = self.records.remove(path) {
            return Some(RemovedEntry::Record(record));
        }
        self.unreadable.remove(path).map(RemovedEntry::Unreadable)
    }

    /// Update the stamp of a readable record. Returns false if unknown.
    pub fn set_stamp(&mut self, path: &Path, stamp: FileStamp) -> bool {
        match self.records.get_mut(path) {
            Some(record) => {
                record.stamp = stamp;
                true
            }
            None => false,
        }
    }

    /// Re-key a record after its file was moved. Returns false if there is
    /// no record at `from` or something already lives at `to`.
    pub fn relocate(&mut self, from: &Path, to: &Path) -> bool {
        if self.records.contains_key(to) || self.unreadable.contains_key(to) {
            return false;
        }
        match self.records.remove(from) {
            Some(mut record) => {
                record.path = to.to_path_buf();
                self.records.insert(record.path.clone(), record);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::extractor::CaptureSource;
    use chrono::NaiveDate;

    /// Build a record with a fingerprint from words and a content hash
    /// derived from `content`.
    pub fn record(path: &str, words: u64, content: &str) -> ImageRecord {
        let params = FingerprintParams::new(8);
        ImageRecord {
            path: PathBuf::from(path),
            stamp: FileStamp {
                size: content.len() as u64,
                modified_secs: 1_700_000_000,
                modified_nanos: 0,
            },
            width: 100,
            height: 100,
            capture: CaptureTime {
                at: NaiveDate::from_ymd_opt(2023, 5, 17)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
                source: CaptureSource::Exif,
            },
            fingerprint: Fingerprint::from_words(params, vec![words]).unwrap(),
            content_hash: ContentHash::of(content.as_bytes()),
        }
    }
}
