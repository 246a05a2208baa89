//! # Similarity Index
//!
//! Banded index over fingerprints that answers "everything within Hamming
//! distance k" without comparing all pairs, and without missing matches.
//!
//! ## How It Works
//! 1. Split every fingerprint into `k + 1` contiguous bands
//! 2. Keep one bucket table per band: band value -> records
//! 3. Two fingerprints within distance k differ in at most k bits, so at
//!    least one of the k + 1 bands is identical (pigeonhole)
//! 4. Candidates are the union of the query's buckets; each candidate is
//!    verified with the true Hamming distance
//!
//! Queries with a radius larger than the index was built for fall back to
//! an exhaustive scan, so results are always exact.

mod bands;

pub use bands::BandLayout;

use crate::core::config::FingerprintParams;
use crate::core::extractor::Fingerprint;
use crate::core::record::RecordTable;
use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// A verified neighbour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub path: PathBuf,
    pub distance: u32,
}

/// Result of a neighbourhood query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Neighborhood {
    /// Neighbours within the radius, ordered by path
    pub neighbors: Vec<Neighbor>,
    /// Candidates whose distance was actually computed
    pub candidates: usize,
}

type Slot = usize;

/// Incrementally updatable banded index
pub struct SimilarityIndex {
    params: FingerprintParams,
    layout: BandLayout,
    slots: Vec<Option<(PathBuf, Fingerprint)>>,
    free: Vec<Slot>,
    by_path: HashMap<PathBuf, Slot>,
    buckets: Vec<HashMap<u64, BTreeSet<Slot>>>,
}

impl SimilarityIndex {
    /// Create an index that answers queries up to `radius` through bands
    pub fn new(params: FingerprintParams, radius: u32) -> Self {
        let layout = BandLayout::new(params.bit_count(), radius);
        let buckets = (0..layout.len()).map(|_| HashMap::new()).collect();
        Self {
            params,
            layout,
            slots: Vec::new(),
            free: Vec::new(),
            by_path: HashMap::new(),
            buckets,
        }
    }

    /// Build an index over every readable record in a table
    pub fn build(table: &RecordTable, radius: u32) -> Result<Self, IndexError> {
        let mut index = Self::new(table.params(), radius);
        for record in table.records() {
            index.insert(record.path.clone(), record.fingerprint.clone())?;
        }
        Ok(index)
    }

    pub fn params(&self) -> FingerprintParams {
        self.params
    }

    pub fn layout(&self) -> &BandLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn fingerprint(&self, path: &Path) -> Option<&Fingerprint> {
        let slot = *self.by_path.get(path)?;
        self.slots[slot].as_ref().map(|(_, fp)| fp)
    }

    pub fn insert(&mut self, path: PathBuf, fingerprint: Fingerprint) -> Result<(), IndexError> {
        if fingerprint.params() != self.params {
            return Err(IndexError::ParamsMismatch {
                path,
                expected: self.params.grid_size,
                found: fingerprint.params().grid_size,
            });
        }
        if self.by_path.contains_key(&path) {
            return Err(IndexError::DuplicatePath { path });
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        for (band, value) in self.layout.values(&fingerprint).enumerate() {
            self.buckets[band].entry(value).or_default().insert(slot);
        }
        self.by_path.insert(path.clone(), slot);
        self.slots[slot] = Some((path, fingerprint));
        Ok(())
    }

    /// Remove a record from every bucket it was inserted under.
    ///
    /// Every bucket is checked before anything changes, so a failed removal
    /// leaves the index as it was.
    pub fn remove(&mut self, path: &Path) -> Result<Fingerprint, IndexError> {
        let slot = self.slot_of(path)?;
        let values: Vec<u64> = match &self.slots[slot] {
            Some((_, fingerprint)) => {
                self.check_buckets(path, slot, fingerprint)?;
                self.layout.values(fingerprint).collect()
            }
            None => {
                return Err(IndexError::NotIndexed {
                    path: path.to_path_buf(),
                })
            }
        };

        for (band, value) in values.into_iter().enumerate() {
            if let Some(bucket) = self.buckets[band].get_mut(&value) {
                bucket.remove(&slot);
                if bucket.is_empty() {
                    self.buckets[band].remove(&value);
                }
            }
        }

        let (_, fingerprint) = self.slots[slot].take().ok_or_else(|| IndexError::NotIndexed {
            path: path.to_path_buf(),
        })?;
        self.by_path.remove(path);
        self.free.push(slot);
        Ok(fingerprint)
    }

    /// Move an entry to a new key without touching its buckets
    pub fn rename(&mut self, from: &Path, to: PathBuf) -> Result<(), IndexError> {
        if self.by_path.contains_key(&to) {
            return Err(IndexError::DuplicatePath { path: to });
        }
        let slot = self.slot_of(from)?;
        let Some((path, _)) = self.slots[slot].as_mut() else {
            return Err(IndexError::NotIndexed {
                path: from.to_path_buf(),
            });
        };
        *path = to.clone();
        self.by_path.remove(from);
        self.by_path.insert(to, slot);
        Ok(())
    }

    fn slot_of(&self, path: &Path) -> Result<usize, IndexError> {
        self.by_path
            .get(path)
            .copied()
            .ok_or_else(|| IndexError::NotIndexed {
                path: path.to_path_buf(),
            })
    }

    /// Fails with `Inconsistency` at the first band whose bucket lacks `slot`
    fn check_buckets(
        &self,
        path: &Path,
        slot: usize,
        fingerprint: &Fingerprint,
    ) -> Result<(), IndexError> {
        for (band, value) in self.layout.values(fingerprint).enumerate() {
            let present = self.buckets[band]
                .get(&value)
                .is_some_and(|bucket| bucket.contains(&slot));
            if !present {
                return Err(IndexError::Inconsistency {
                    path: path.to_path_buf(),
                    band,
                    value,
                });
            }
        }
        Ok(())
    }

    /// All indexed records within `radius` of `fingerprint`
    pub fn query(&self, fingerprint: &Fingerprint, radius: u32) -> Neighborhood {
        if radius > self.layout.radius() {
            return self.query_exhaustive(fingerprint, radius);
        }

        let mut candidates: BTreeSet<Slot> = BTreeSet::new();
        for (band, value) in self.layout.values(fingerprint).enumerate() {
            if let Some(bucket) = self.buckets[band].get(&value) {
                candidates.extend(bucket.iter().copied());
            }
        }

        let checked = candidates.len();
        let mut neighbors: Vec<Neighbor> = candidates
            .into_iter()
            .filter_map(|slot| self.slots[slot].as_ref())
            .filter_map(|(path, fp)| {
                let distance = fp.distance(fingerprint);
                (distance <= radius).then(|| Neighbor {
                    path: path.clone(),
                    distance,
                })
            })
            .collect();
        neighbors.sort_by(|a, b| a.path.cmp(&b.path));

        Neighborhood {
            neighbors,
            candidates: checked,
        }
    }

    /// Compare against every record; the reference the banded query must
    /// agree with
    pub fn query_exhaustive(&self, fingerprint: &Fingerprint, radius: u32) -> Neighborhood {
        let mut neighbors: Vec<Neighbor> = self
            .slots
            .iter()
            .flatten()
            .filter_map(|(path, fp)| {
                let distance = fp.distance(fingerprint);
                (distance <= radius).then(|| Neighbor {
                    path: path.clone(),
                    distance,
                })
            })
            .collect();
        neighbors.sort_by(|a, b| a.path.cmp(&b.path));

        Neighborhood {
            candidates: self.len(),
            neighbors,
        }
    }

    /// Neighbours of an indexed record, excluding itself.
    ///
    /// Fails with `Inconsistency` if the record is missing from any bucket
    /// it was inserted under.
    pub fn neighbors_of(&self, path: &Path, radius: u32) -> Result<Neighborhood, IndexError> {
        let slot = self.slot_of(path)?;
        let (_, fingerprint) = self.slots[slot]
            .as_ref()
            .ok_or_else(|| IndexError::NotIndexed {
                path: path.to_path_buf(),
            })?;
        self.check_buckets(path, slot, fingerprint)?;

        let mut result = self.query(fingerprint, radius);
        result.neighbors.retain(|n| n.path != path);
        Ok(result)
    }

    pub fn stats(&self) -> IndexStats {
        let total_buckets = self.buckets.iter().map(|t| t.len()).sum();
        let max_bucket_size = self
            .buckets
            .iter()
            .flat_map(|t| t.values())
            .map(|b| b.len())
            .max()
            .unwrap_or(0);

        IndexStats {
            records: self.len(),
            bands: self.layout.len(),
            radius: self.layout.radius(),
            total_buckets,
            max_bucket_size,
        }
    }

    #[cfg(test)]
    fn corrupt_bucket(&mut self, path: &Path) {
        let slot = self.by_path[path];
        for table in &mut self.buckets {
            for bucket in table.values_mut() {
                bucket.remove(&slot);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_last_band(&mut self, path: &Path) {
        let slot = self.by_path[path];
        if let Some(table) = self.buckets.last_mut() {
            for bucket in table.values_mut() {
                bucket.remove(&slot);
            }
        }
    }
}

/// Statistics about the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub records: usize,
    pub bands: usize,
    pub radius: u32,
    pub total_buckets: usize,
    pub max_bucket_size: usize,
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Similarity index: {} records, {} bands (exact to distance {}), {} buckets, largest {}",
            self.records, self.bands, self.radius, self.total_buckets, self.max_bucket_size
        )
    }
}
