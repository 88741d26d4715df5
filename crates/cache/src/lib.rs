//! Bounded cache of the most recently appended entries.
//!
//! The cache is a ring keyed by `index % capacity`: admitting index `i`
//! implicitly evicts index `i - capacity`, so it always holds a window of
//! the newest entries. Readers consult it before decoding from disk, and
//! because the writer caches every append, an index above the highest
//! cached one is known not to exist yet.
//!
//! A single writer publishes through per-slot locks plus a release-store
//! on the highest-index cursor; readers acquire-load the cursor and
//! observe either the prior or the new state of a slot, never a torn
//! intermediate.

use entry::Indexed;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

pub struct EntryCache<E> {
    slots: Box<[RwLock<Option<Indexed<E>>>]>,
    highest: AtomicU64,
}

impl<E> EntryCache<E> {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let slots = (0..capacity)
            .map(|_| RwLock::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            highest: AtomicU64::new(0),
        }
    }

    /// Admits an entry, evicting whatever occupied its ring slot.
    pub fn put(&self, indexed: Indexed<E>) {
        let slot = (indexed.index % self.slots.len() as u64) as usize;
        let index = indexed.index;
        *self.slots[slot].write().unwrap_or_else(PoisonError::into_inner) = Some(indexed);
        self.highest.store(index, Ordering::Release);
    }

    /// The highest cached index, or 0 if the cache is empty.
    pub fn highest_index(&self) -> u64 {
        self.highest.load(Ordering::Acquire)
    }

    /// Drops cached entries above `last_index` and lowers the cursor.
    pub fn truncate(&self, last_index: u64) {
        let mut highest = 0u64;
        for slot in self.slots.iter() {
            let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(cached) if cached.index > last_index => *guard = None,
                Some(cached) => highest = highest.max(cached.index),
                None => {}
            }
        }
        self.highest.store(highest, Ordering::Release);
    }
}

impl<E: Clone> EntryCache<E> {
    /// Returns the cached entry at `index`, or `None` on a miss.
    pub fn get(&self, index: u64) -> Option<Indexed<E>> {
        let highest = self.highest_index();
        if highest == 0 || index > highest {
            return None;
        }
        // anything more than a full ring behind the cursor was evicted
        if index + self.slots.len() as u64 <= highest {
            return None;
        }
        let slot = (index % self.slots.len() as u64) as usize;
        let guard = self.slots[slot].read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(cached) if cached.index == index => Some(cached.clone()),
            _ => None,
        }
    }
}
