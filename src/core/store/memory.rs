//! In-memory record store for testing.

use super::{RecordStore, Snapshot};
use crate::core::cluster::PinnedAssignments;
use crate::core::config::FingerprintParams;
use crate::core::record::RecordTable;
use crate::error::StoreError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// In-memory store
///
/// Useful for tests and one-shot runs where persistence isn't needed.
#[derive(Default)]
pub struct InMemoryRecordStore {
    saved: RwLock<Option<(RecordTable, PinnedAssignments)>>,
    saves: AtomicUsize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn load(&self, params: FingerprintParams) -> Result<Snapshot, StoreError> {
        let saved = self
            .saved
            .read()
            .map_err(|_| StoreError::Corrupted("memory store lock poisoned".to_string()))?;

        Ok(match saved.as_ref() {
            None => Snapshot::empty(params),
            Some((table, pins)) if table.params() == params => Snapshot {
                table: table.clone(),
                pins: pins.clone(),
                discarded: 0,
            },
            Some((table, pins)) => Snapshot {
                table: RecordTable::new(params),
                pins: pins.clone(),
                discarded: table.len() + table.unreadable_len(),
            },
        })
    }

    fn save(&self, table: &RecordTable, pins: &PinnedAssignments) -> Result<(), StoreError> {
        let mut saved = self
            .saved
            .write()
            .map_err(|_| StoreError::Corrupted("memory store lock poisoned".to_string()))?;
        *saved = Some((table.clone(), pins.clone()));
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut saved = self
            .saved
            .write()
            .map_err(|_| StoreError::Corrupted("memory store lock poisoned".to_string()))?;
        *saved = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::test_support::record;

    #[test]
    fn empty_until_saved() {
        let store = InMemoryRecordStore::new();
        let snapshot = store.load(FingerprintParams::new(8)).unwrap();
        assert!(snapshot.table.is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn other_params_discard_records() {
        let store = InMemoryRecordStore::new();
        let mut table = RecordTable::new(FingerprintParams::new(8));
        table.insert(record("/p/a.jpg", 1, "a"));
        store.save(&table, &PinnedAssignments::new()).unwrap();

        let same = store.load(FingerprintParams::new(8)).unwrap();
        assert_eq!(same.table, table);

        let other = store.load(FingerprintParams::new(16)).unwrap();
        assert!(other.table.is_empty());
        assert_eq!(other.discarded, 1);
    }
}
