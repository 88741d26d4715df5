//! Forward cursor over a single segment.
//!
//! Each reader owns a private read-only file handle wrapped in a
//! read-ahead buffer, so any number of readers can iterate one segment
//! independently of the writer and of each other. Decoding prefers the
//! shared entry cache; on a hit the logical file position is still
//! advanced past the record's on-disk bytes so that later misses resume
//! from the right offset.
//!
//! A zero or oversized length, a short payload, or a CRC mismatch stops
//! the cursor cleanly: a torn write at the tail is indistinguishable from
//! the pre-allocated zero fill, and both read as end-of-log. The cursor
//! re-polls the file on the next `has_next`, so entries appended after an
//! EOF become visible without a reset. Readers created with `verify` set
//! surface [`StorageError::Corruption`] instead of absorbing mismatches.

use byteorder::{LittleEndian, ReadBytesExt};
use cache::EntryCache;
use crc32fast::Hasher as Crc32;
use entry::{Codec, Indexed};
use index::SparseIndex;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::warn;

use crate::format::{SegmentDescriptor, DESCRIPTOR_BYTES, FRAME_BYTES};
use crate::StorageError;

pub struct SegmentReader<E, C> {
    rdr: BufReader<File>,
    codec: Arc<C>,
    index: Arc<SparseIndex>,
    cache: Arc<EntryCache<E>>,
    first_index: u64,
    max_entry_size: usize,
    verify: bool,
    /// File offset of the next record to read from disk. When `peeked`
    /// is populated this already points past the peeked record.
    pos: u64,
    /// Whether the buffered reader's cursor currently sits at `pos`.
    synced: bool,
    /// Index the next `next()` call will return.
    next_index: u64,
    current: Option<Indexed<E>>,
    peeked: Option<Indexed<E>>,
    payload: Vec<u8>,
}

impl<E, C> SegmentReader<E, C> {
    pub(crate) fn new(
        file: File,
        descriptor: &SegmentDescriptor,
        max_entry_size: usize,
        cache: Arc<EntryCache<E>>,
        index: Arc<SparseIndex>,
        codec: Arc<C>,
        verify: bool,
    ) -> Self {
        let capacity = 2 * (max_entry_size + FRAME_BYTES as usize);
        Self {
            rdr: BufReader::with_capacity(capacity, file),
            codec,
            index,
            cache,
            first_index: descriptor.first_index,
            max_entry_size,
            verify,
            pos: DESCRIPTOR_BYTES,
            synced: false,
            next_index: descriptor.first_index,
            current: None,
            peeked: None,
            payload: Vec::new(),
        }
    }

    /// Positions the cursor before the first entry of the segment.
    pub fn reset(&mut self) {
        self.pos = DESCRIPTOR_BYTES;
        self.synced = false;
        self.next_index = self.first_index;
        self.current = None;
        self.peeked = None;
    }

    /// Index of the last entry returned by `next()`, or 0 if none.
    pub fn current_index(&self) -> u64 {
        self.current.as_ref().map_or(0, |e| e.index)
    }

    /// The last entry returned by `next()`, if any.
    pub fn current_entry(&self) -> Option<&Indexed<E>> {
        self.current.as_ref()
    }

    /// Index the next `next()` call will return.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}

impl<E, C> SegmentReader<E, C>
where
    E: Clone,
    C: Codec<E>,
{
    /// Positions the cursor so the next `next()` returns `target`, or the
    /// segment's tail if `target` is past the end. Jumps through the
    /// sparse index, then scans forward.
    pub fn reset_to(&mut self, target: u64) -> Result<(), StorageError> {
        self.reset();
        if let Some(position) = self.index.lookup(target.saturating_sub(1)) {
            self.pos = position.offset;
            self.next_index = position.index;
        }
        while self.next_index < target && self.has_next()? {
            self.next()?;
        }
        Ok(())
    }

    /// True if another valid record exists at or after the cursor.
    pub fn has_next(&mut self) -> Result<bool, StorageError> {
        if self.peeked.is_none() {
            self.read_next()?;
        }
        Ok(self.peeked.is_some())
    }

    /// Returns the entry at the cursor and advances past it.
    pub fn next(&mut self) -> Result<Indexed<E>, StorageError> {
        if !self.has_next()? {
            return Err(StorageError::NoSuchEntry);
        }
        match self.peeked.take() {
            Some(entry) => {
                self.next_index = entry.index + 1;
                self.current = Some(entry.clone());
                Ok(entry)
            }
            None => Err(StorageError::NoSuchEntry),
        }
    }

    /// Reads the record holding `next_index` into `peeked`, or leaves it
    /// empty at end-of-log. `pos` only advances past fully validated
    /// records, so a failed read is retried from the same offset.
    fn read_next(&mut self) -> Result<(), StorageError> {
        let index = self.next_index;

        if let Some(cached) = self.cache.get(index) {
            self.pos += FRAME_BYTES + cached.size as u64;
            self.synced = false;
            self.peeked = Some(cached);
            return Ok(());
        }
        // the writer caches every append, so an index above the cache's
        // high mark does not exist yet
        let cached_high = self.cache.highest_index();
        if cached_high > 0 && cached_high < index {
            self.peeked = None;
            return Ok(());
        }

        if !self.synced {
            self.rdr.seek(SeekFrom::Start(self.pos))?;
            self.synced = true;
        }

        let length = match self.rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return self.stop(index, false),
            Err(e) => {
                self.desync();
                return Err(e.into());
            }
        };
        if length == 0 {
            return self.stop(index, false);
        }
        if length as usize > self.max_entry_size {
            return self.stop(index, true);
        }
        let crc = match self.rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return self.stop(index, false),
            Err(e) => {
                self.desync();
                return Err(e.into());
            }
        };

        self.payload.clear();
        self.payload.resize(length as usize, 0);
        match self.rdr.read_exact(&mut self.payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return self.stop(index, true),
            Err(e) => {
                self.desync();
                return Err(e.into());
            }
        }

        let mut hasher = Crc32::new();
        hasher.update(&self.payload);
        if hasher.finalize() != crc {
            return self.stop(index, true);
        }

        let entry = match self.codec.decode(&self.payload) {
            Ok(entry) => entry,
            Err(e) => {
                self.desync();
                return Err(e.into());
            }
        };

        self.pos += FRAME_BYTES + length as u64;
        self.peeked = Some(Indexed::new(index, entry, length));
        Ok(())
    }

    /// Ends the scan at the current record. In verify mode a record that
    /// is present but invalid is surfaced instead of absorbed.
    fn stop(&mut self, index: u64, suspect: bool) -> Result<(), StorageError> {
        self.peeked = None;
        self.desync();
        if suspect {
            if self.verify {
                return Err(StorageError::Corruption { index });
            }
            warn!(index, offset = self.pos, "absorbing invalid record as end-of-log");
        }
        Ok(())
    }

    fn desync(&mut self) {
        // force a re-seek on the next poll; the buffered cursor has
        // moved past `pos`
        self.synced = false;
    }
}
