//! Sparse in-memory index from entry indices to file offsets.
//!
//! Indexing every entry of a large segment is memory-prohibitive, so only
//! a density-selected subset of positions is kept. A lookup returns the
//! closest recorded position at or before the target; the reader then
//! scans forward at most `1/density` records.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A recorded entry position: the entry's index and the file offset of
/// the start of its record frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub index: u64,
    pub offset: u64,
}

/// Density-sampled map from entry index to file offset.
///
/// Writers call [`record`](SparseIndex::record) for every appended entry;
/// the density predicate decides which positions are actually retained.
/// The first entry of a segment is always retained so that lookups below
/// any later index point still have somewhere to land.
///
/// All methods take `&self`; the map is guarded by an `RwLock` so a
/// single writer and many readers can share one instance through an
/// `Arc`.
pub struct SparseIndex {
    first_index: u64,
    density: f64,
    positions: RwLock<BTreeMap<u64, u64>>,
}

impl SparseIndex {
    /// Creates an index for a segment whose first entry is `first_index`.
    ///
    /// # Panics
    ///
    /// Panics if `density` is not in `(0, 1]`.
    pub fn new(first_index: u64, density: f64) -> Self {
        assert!(
            density > 0.0 && density <= 1.0,
            "density must be in (0, 1]"
        );
        Self {
            first_index,
            density,
            positions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Records the position of `index` if it satisfies the density
    /// predicate relative to the previously recorded entry. No-op
    /// otherwise; calling twice for the same index is harmless.
    pub fn record(&self, index: u64, offset: u64) {
        let mut positions = self.write();
        match positions.last_key_value() {
            None => {
                // first entry of the segment is always indexed
                positions.insert(index, offset);
            }
            Some((&last, _)) => {
                if index <= last {
                    return;
                }
                let prev = ((last - self.first_index) as f64 * self.density).floor();
                let next = ((index - self.first_index) as f64 * self.density).floor();
                if next > prev {
                    positions.insert(index, offset);
                }
            }
        }
    }

    /// Returns the recorded position with the greatest index at or below
    /// `target`, or `None` if no such position exists.
    pub fn lookup(&self, target: u64) -> Option<Position> {
        self.read()
            .range(..=target)
            .next_back()
            .map(|(&index, &offset)| Position { index, offset })
    }

    /// Drops every recorded position above `last_index`.
    pub fn truncate(&self, last_index: u64) {
        let mut positions = self.write();
        let _ = positions.split_off(&(last_index + 1));
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<u64, u64>> {
        self.positions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<u64, u64>> {
        self.positions.write().unwrap_or_else(PoisonError::into_inner)
    }
}
