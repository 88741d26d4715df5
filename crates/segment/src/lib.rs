//! # Segment - one pre-allocated log file
//!
//! A segment is a single file holding a contiguous range of entry
//! indices: a fixed-width descriptor at offset 0, then length-prefixed,
//! CRC-protected records, then zero fill out to the pre-allocated size.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ DESCRIPTOR (64 bytes)                                     │
//! │ magic | version | id | first_index | max_segment_size     │
//! ├──────────────────────────────────────────────────────────┤
//! │ RECORDS                                                   │
//! │ length (u32 LE) | crc32 (u32 LE) | payload                │
//! │ ... repeated ...                                          │
//! ├──────────────────────────────────────────────────────────┤
//! │ ZERO FILL (logical EOF)                                   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`Segment`] owns the descriptor, the shared sparse index and
//! entry cache, and the single [`SegmentWriter`]; every
//! [`SegmentReader`] gets its own read-only file handle. While open,
//! writer and readers may be obtained; once closed or deleted both fail
//! with [`StorageError::NotOpen`].
//!
//! ## Crash safety
//!
//! The file is extended to its full size at creation, so the bytes past
//! the tail are zero and a zero record length is the canonical
//! end-of-data marker. A crash mid-append leaves a record whose length,
//! payload, or CRC is invalid; replay on reopen stops in front of it and
//! the next append overwrites it.

mod format;
mod reader;
mod writer;

pub use format::{
    parse_segment_file_name, segment_file_name, SegmentDescriptor, DESCRIPTOR_BYTES, FRAME_BYTES,
    SEGMENT_MAGIC,
};
pub use reader::SegmentReader;
pub use writer::SegmentWriter;

use cache::EntryCache;
use entry::CodecError;
use index::SparseIndex;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying file system failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A serialized entry exceeded the configured entry limit. The log
    /// state is unchanged.
    #[error("serialized entry is {size} bytes, over the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },

    /// The record would cross the pre-allocated end of the segment.
    /// Recovered internally by rolling to a new segment.
    #[error("record does not fit in the remaining segment space")]
    SegmentFull,

    /// A reader was advanced past the last entry.
    #[error("no entry at the cursor")]
    NoSuchEntry,

    /// Writer or reader requested on a closed or deleted segment.
    #[error("segment is not open")]
    NotOpen,

    /// A record failed validation while reading in verify mode.
    #[error("corrupt record at index {index}")]
    Corruption { index: u64 },

    /// The pluggable codec rejected an entry.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A segment file header could not be validated.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A single log segment: descriptor, pre-allocated file, writer, sparse
/// index, and entry cache.
pub struct Segment<E, C> {
    descriptor: SegmentDescriptor,
    path: PathBuf,
    max_entry_size: usize,
    index: Arc<SparseIndex>,
    cache: Arc<EntryCache<E>>,
    codec: Arc<C>,
    writer: Mutex<SegmentWriter<E, C>>,
    open: AtomicBool,
}

impl<E, C> Segment<E, C> {
    /// Creates a new segment file: writes the descriptor, extends the
    /// file to `max_segment_size`, and opens it.
    pub fn create(
        path: PathBuf,
        descriptor: SegmentDescriptor,
        max_entry_size: usize,
        index_density: f64,
        cache_size: usize,
        codec: Arc<C>,
    ) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        descriptor.write_to(&mut file)?;
        file.set_len(descriptor.max_segment_size)?;
        file.sync_all()?;
        debug!(
            id = descriptor.id,
            first_index = descriptor.first_index,
            path = %path.display(),
            "created segment"
        );
        Self::from_file(path, file, descriptor, max_entry_size, index_density, cache_size, codec)
    }

    /// Opens an existing segment file, validating its descriptor and
    /// replaying records to find the tail.
    pub fn open(
        path: PathBuf,
        max_entry_size: usize,
        index_density: f64,
        cache_size: usize,
        codec: Arc<C>,
    ) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let descriptor = SegmentDescriptor::read_from(&mut file)?;
        // a crash between create and set_len leaves a short file;
        // normalize so zero fill past the tail is guaranteed
        if file.metadata()?.len() != descriptor.max_segment_size {
            file.set_len(descriptor.max_segment_size)?;
        }
        Self::from_file(path, file, descriptor, max_entry_size, index_density, cache_size, codec)
    }

    fn from_file(
        path: PathBuf,
        file: File,
        descriptor: SegmentDescriptor,
        max_entry_size: usize,
        index_density: f64,
        cache_size: usize,
        codec: Arc<C>,
    ) -> Result<Self, StorageError> {
        let index = Arc::new(SparseIndex::new(descriptor.first_index, index_density));
        let cache = Arc::new(EntryCache::new(cache_size));
        let writer = SegmentWriter::new(
            file,
            &descriptor,
            max_entry_size,
            Arc::clone(&cache),
            Arc::clone(&index),
            Arc::clone(&codec),
        )?;
        Ok(Self {
            descriptor,
            path,
            max_entry_size,
            index,
            cache,
            codec,
            writer: Mutex::new(writer),
            open: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> u64 {
        self.descriptor.id
    }

    pub fn version(&self) -> u32 {
        self.descriptor.version
    }

    /// Logical index of the first entry this segment can hold.
    pub fn first_index(&self) -> u64 {
        self.descriptor.first_index
    }

    /// Index of the last entry, or `first_index - 1` if empty.
    pub fn last_index(&self) -> u64 {
        self.lock_writer().last_index()
    }

    /// Index the next append will be assigned.
    pub fn next_index(&self) -> u64 {
        self.lock_writer().next_index()
    }

    /// Number of entries in the segment.
    pub fn length(&self) -> u64 {
        self.next_index() - self.first_index()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn is_full(&self) -> bool {
        self.lock_writer().is_full()
    }

    /// Bytes written, including the descriptor.
    pub fn size(&self) -> u64 {
        self.lock_writer().size()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The segment's single writer. Fails once the segment is closed or
    /// deleted.
    pub fn writer(&self) -> Result<MutexGuard<'_, SegmentWriter<E, C>>, StorageError> {
        self.check_open()?;
        Ok(self.lock_writer())
    }

    /// Opens an independent reader over this segment. Each reader gets a
    /// private file handle, so readers never contend with each other.
    pub fn create_reader(&self, verify: bool) -> Result<SegmentReader<E, C>, StorageError> {
        self.check_open()?;
        let file = File::open(&self.path)?;
        Ok(SegmentReader::new(
            file,
            &self.descriptor,
            self.max_entry_size,
            Arc::clone(&self.cache),
            Arc::clone(&self.index),
            Arc::clone(&self.codec),
            verify,
        ))
    }

    /// Flushes and closes the segment. Outstanding readers keep their
    /// own file handles and close independently.
    pub fn close(&self) -> Result<(), StorageError> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.lock_writer().flush()?;
        }
        Ok(())
    }

    /// Closes the segment and unlinks its file.
    pub fn delete(&self) -> Result<(), StorageError> {
        self.close()?;
        fs::remove_file(&self.path)?;
        debug!(id = self.descriptor.id, path = %self.path.display(), "deleted segment");
        Ok(())
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StorageError::NotOpen)
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, SegmentWriter<E, C>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests;
