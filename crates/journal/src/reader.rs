//! Multi-segment cursor.

use entry::{Codec, Indexed};
use segment::{Segment, SegmentReader, StorageError};
use std::sync::Arc;

use crate::Shared;

/// A forward cursor over the whole journal.
///
/// Wraps one [`SegmentReader`] at a time and rolls into the next segment
/// when the current one is exhausted. Each reader owns a private file
/// handle per segment, so readers never interfere with each other or
/// with the writer.
pub struct JournalReader<E, C> {
    shared: Arc<Shared<E, C>>,
    segment: Arc<Segment<E, C>>,
    reader: SegmentReader<E, C>,
    verify: bool,
    current: Option<Indexed<E>>,
}

impl<E, C> JournalReader<E, C>
where
    E: Clone,
    C: Codec<E>,
{
    pub(crate) fn new(
        shared: Arc<Shared<E, C>>,
        start_index: u64,
        verify: bool,
    ) -> Result<Self, StorageError> {
        let segment = Self::locate(&shared, start_index)?;
        let mut reader = segment.create_reader(verify)?;
        reader.reset_to(start_index)?;
        Ok(Self {
            shared,
            segment,
            reader,
            verify,
            current: None,
        })
    }

    /// The segment holding `index`: the greatest `first_index` at or
    /// below it, or the head segment when `index` precedes the log.
    fn locate(
        shared: &Arc<Shared<E, C>>,
        index: u64,
    ) -> Result<Arc<Segment<E, C>>, StorageError> {
        let map = shared.segments();
        map.range(..=index)
            .next_back()
            .map(|(_, segment)| Arc::clone(segment))
            .or_else(|| map.values().next().cloned())
            .ok_or(StorageError::NotOpen)
    }

    /// Index of the last entry returned by `next()`, or 0 if none.
    pub fn current_index(&self) -> u64 {
        self.current.as_ref().map_or(0, |entry| entry.index)
    }

    /// The last entry returned by `next()`, if any.
    pub fn current_entry(&self) -> Option<&Indexed<E>> {
        self.current.as_ref()
    }

    /// Index the next `next()` call will return.
    pub fn next_index(&self) -> u64 {
        self.reader.next_index()
    }

    /// True if another entry exists at or after the cursor, crossing
    /// into the next segment when the current one is exhausted.
    pub fn has_next(&mut self) -> Result<bool, StorageError> {
        if self.reader.has_next()? {
            return Ok(true);
        }
        let next_index = self.reader.next_index();
        let next_segment = {
            self.shared
                .segments()
                .get(&next_index)
                .map(Arc::clone)
        };
        if let Some(segment) = next_segment {
            let mut reader = segment.create_reader(self.verify)?;
            reader.reset();
            self.segment = segment;
            self.reader = reader;
            return self.reader.has_next();
        }
        Ok(false)
    }

    /// Returns the entry at the cursor and advances past it.
    pub fn next(&mut self) -> Result<Indexed<E>, StorageError> {
        if !self.has_next()? {
            return Err(StorageError::NoSuchEntry);
        }
        let entry = self.reader.next()?;
        self.current = Some(entry.clone());
        Ok(entry)
    }

    /// Rewinds to the first entry of the log.
    pub fn reset(&mut self) -> Result<(), StorageError> {
        let first_index = {
            self.shared
                .segments()
                .values()
                .next()
                .map(|segment| segment.first_index())
                .ok_or(StorageError::NotOpen)?
        };
        self.reset_to(first_index)
    }

    /// Repositions so the next `next()` returns `index`, re-locating the
    /// owning segment if needed.
    pub fn reset_to(&mut self, index: u64) -> Result<(), StorageError> {
        let segment = Self::locate(&self.shared, index)?;
        if !Arc::ptr_eq(&segment, &self.segment) {
            self.reader = segment.create_reader(self.verify)?;
            self.segment = segment;
        }
        self.current = None;
        self.reader.reset_to(index)
    }

    /// Releases the reader's file handle.
    pub fn close(self) {}
}
