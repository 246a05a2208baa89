//! Record store trait definition.

use crate::core::cluster::PinnedAssignments;
use crate::core::config::FingerprintParams;
use crate::core::record::RecordTable;
use crate::error::StoreError;

/// Persisted coordinator state as loaded back
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub table: RecordTable,
    pub pins: PinnedAssignments,
    /// Entries dropped because they were extracted with other parameters
    pub discarded: usize,
}

impl Snapshot {
    pub fn empty(params: FingerprintParams) -> Self {
        Self {
            table: RecordTable::new(params),
            pins: PinnedAssignments::new(),
            discarded: 0,
        }
    }
}

/// Trait for record table persistence
pub trait RecordStore: Send + Sync {
    /// Load the last saved state.
    ///
    /// Returns an empty snapshot if nothing was saved yet. A saved table
    /// extracted with different fingerprint parameters is stale as a whole:
    /// its entries are discarded and counted, pins are kept.
    fn load(&self, params: FingerprintParams) -> Result<Snapshot, StoreError>;

    /// Replace the saved state. Either the whole new state is visible
    /// afterwards or the previous one is left untouched.
    fn save(&self, table: &RecordTable, pins: &PinnedAssignments) -> Result<(), StoreError>;

    /// Forget everything saved
    fn clear(&self) -> Result<(), StoreError>;
}
