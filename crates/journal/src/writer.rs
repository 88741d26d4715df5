//! Append path across segments.

use entry::{Codec, Indexed};
use segment::{Segment, StorageError};
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

use crate::Shared;

/// The journal's single writer.
///
/// Delegates appends to the active segment and rolls to a fresh segment
/// when a record no longer fits. At most one instance exists per
/// journal; obtain it through [`Journal::writer`](crate::Journal::writer).
pub struct JournalWriter<E, C> {
    shared: Arc<Shared<E, C>>,
    active: Arc<Segment<E, C>>,
}

impl<E, C> JournalWriter<E, C> {
    pub(crate) fn new(shared: Arc<Shared<E, C>>, active: Arc<Segment<E, C>>) -> Self {
        Self { shared, active }
    }

    /// Index of the last appended entry.
    pub fn last_index(&self) -> u64 {
        self.active.last_index()
    }

    /// Index the next append will be assigned.
    pub fn next_index(&self) -> u64 {
        self.active.next_index()
    }

    /// Forces previously appended entries to stable storage.
    pub fn commit(&mut self) -> Result<(), StorageError> {
        self.active.writer()?.flush()
    }

    /// Drops every entry above `last_index`: segments past the new tail
    /// are deleted outright, the containing segment is truncated in
    /// place. Truncating below the log's first index resets the head
    /// segment to empty.
    pub fn truncate(&mut self, last_index: u64) -> Result<(), StorageError> {
        if last_index >= self.last_index() {
            return Ok(());
        }

        let target = {
            let mut map = self.shared.segments_mut();
            // the segment that keeps the new tail; everything after it goes
            let keep = map
                .range(..=last_index)
                .next_back()
                .map(|(&key, _)| key)
                .or_else(|| map.keys().next().copied())
                .ok_or(StorageError::NotOpen)?;

            let doomed: Vec<u64> = map
                .range((Bound::Excluded(keep), Bound::Unbounded))
                .map(|(&key, _)| key)
                .collect();
            for key in doomed {
                if let Some(segment) = map.remove(&key) {
                    debug!(id = segment.id(), first_index = key, "dropping truncated segment");
                    segment.delete()?;
                }
            }
            map.get(&keep).cloned().ok_or(StorageError::NotOpen)?
        };

        debug!(last_index, segment = target.id(), "truncating journal");
        target.writer()?.truncate(last_index)?;
        self.active = target;
        Ok(())
    }

    /// Creates the next segment and makes it active.
    fn roll(&mut self) -> Result<(), StorageError> {
        // seal what we have before moving on
        self.active.writer()?.flush()?;

        let id = self.active.id() + 1;
        let first_index = self.active.last_index() + 1;
        let segment = self.shared.create_segment(id, first_index)?;
        debug!(id, first_index, "rolled to new segment");

        self.shared
            .segments_mut()
            .insert(first_index, Arc::clone(&segment));
        self.active = segment;
        Ok(())
    }
}

impl<E, C> JournalWriter<E, C>
where
    E: Clone,
    C: Codec<E>,
{
    /// Appends an entry at the next index, rolling to a new segment if
    /// the active one is out of space.
    pub fn append(&mut self, entry: &E) -> Result<Indexed<E>, StorageError> {
        loop {
            let result = self.active.writer()?.append(entry);
            match result {
                Err(StorageError::SegmentFull) => self.roll()?,
                other => return other,
            }
        }
    }
}
