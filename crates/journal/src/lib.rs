//! # Journal - the segmented append-only log
//!
//! Composes an ordered, gap-free sequence of [`segment`] files into one
//! logical log. A single writer appends to the newest segment and rolls
//! to a fresh one when a record no longer fits; any number of readers
//! stream entries and cross segment boundaries transparently.
//!
//! ```text
//! Journal
//!   |
//!   | writer() ──────▶ active segment ──roll on full──▶ new segment
//!   |
//!   | open_reader(i) ─▶ binary search on first_index
//!   |                     └─▶ SegmentReader ──EOF──▶ next segment
//!   |
//!   | truncate(k) ────▶ delete segments above k, truncate the rest
//!   | compact(k) ─────▶ delete segments wholly below k
//! ```
//!
//! ## Module responsibilities
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `lib.rs`    | `Journal` struct, config, recovery, compaction       |
//! | `writer.rs` | `JournalWriter`: append, roll-over, commit, truncate |
//! | `reader.rs` | `JournalReader`: multi-segment cursor                |
//!
//! ## Recovery
//!
//! On [`Journal::open`] the storage directory is scanned for segment
//! files, which sort lexicographically in creation order. Each segment
//! replays its records to rebuild the tail, so a torn record left by a
//! crash mid-append is dropped and the next append overwrites it. The
//! loaded segments must form a contiguous index range; a fresh directory
//! is bootstrapped with one empty segment starting at index 1.
//!
//! ## Durability
//!
//! `append` leaves durability to the caller: entries reach the shared
//! page cache immediately (and are therefore visible to readers on the
//! same host) but survive power loss only after
//! [`JournalWriter::commit`].

mod reader;
mod writer;

pub use entry::{BytesCodec, Codec, CodecError, Indexed};
pub use reader::JournalReader;
pub use segment::StorageError;
pub use writer::JournalWriter;

use segment::{
    parse_segment_file_name, segment_file_name, Segment, SegmentDescriptor, DESCRIPTOR_BYTES,
    FRAME_BYTES,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Tuning knobs for a [`Journal`].
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the segment files.
    pub directory: PathBuf,
    /// Upper bound on a serialized entry; also sizes reader buffers.
    pub max_entry_size: usize,
    /// Pre-allocated segment file size and roll-over threshold.
    pub max_segment_size: u64,
    /// Fraction of entries recorded in the sparse index, in (0, 1].
    pub index_density: f64,
    /// Ring capacity of the per-segment entry cache.
    pub cache_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("journal"),
            max_entry_size: 1024 * 1024,
            max_segment_size: 32 * 1024 * 1024,
            index_density: 0.005,
            cache_size: 256,
        }
    }
}

impl JournalConfig {
    fn validate(&self) -> Result<(), StorageError> {
        if self.max_entry_size == 0 || self.max_entry_size > u32::MAX as usize {
            return Err(StorageError::InvalidConfig(format!(
                "max_entry_size {} must be in 1..=u32::MAX",
                self.max_entry_size
            )));
        }
        if self.max_segment_size < DESCRIPTOR_BYTES + FRAME_BYTES + 1 {
            return Err(StorageError::InvalidConfig(format!(
                "max_segment_size {} leaves no room for records",
                self.max_segment_size
            )));
        }
        if !(self.index_density > 0.0 && self.index_density <= 1.0) {
            return Err(StorageError::InvalidConfig(format!(
                "index_density {} must be in (0, 1]",
                self.index_density
            )));
        }
        if self.cache_size == 0 {
            return Err(StorageError::InvalidConfig(
                "cache_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// State shared between the journal, its writer, and all readers.
pub(crate) struct Shared<E, C> {
    pub(crate) config: JournalConfig,
    pub(crate) codec: Arc<C>,
    /// Segments keyed by their first index.
    pub(crate) segments: RwLock<BTreeMap<u64, Arc<Segment<E, C>>>>,
    pub(crate) open: AtomicBool,
}

impl<E, C> Shared<E, C> {
    pub(crate) fn segments(&self) -> RwLockReadGuard<'_, BTreeMap<u64, Arc<Segment<E, C>>>> {
        self.segments.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn segments_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<u64, Arc<Segment<E, C>>>> {
        self.segments.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn create_segment(
        &self,
        id: u64,
        first_index: u64,
    ) -> Result<Arc<Segment<E, C>>, StorageError> {
        let descriptor = SegmentDescriptor {
            id,
            version: 1,
            first_index,
            max_segment_size: self.config.max_segment_size,
        };
        let path = self.config.directory.join(segment_file_name(id, 1));
        let segment = Segment::create(
            path,
            descriptor,
            self.config.max_entry_size,
            self.config.index_density,
            self.config.cache_size,
            Arc::clone(&self.codec),
        )?;
        Ok(Arc::new(segment))
    }
}

/// The multi-segment log. Owns the single [`JournalWriter`] and hands
/// out independent [`JournalReader`]s.
pub struct Journal<E, C> {
    shared: Arc<Shared<E, C>>,
    writer: JournalWriter<E, C>,
}

impl<E, C> Journal<E, C> {
    /// Opens (or bootstraps) a journal in `config.directory`, recovering
    /// any existing segments.
    pub fn open(config: JournalConfig, codec: C) -> Result<Self, StorageError> {
        config.validate()?;
        fs::create_dir_all(&config.directory)?;
        let codec = Arc::new(codec);

        // segment filenames sort in creation order
        let mut files: Vec<(u64, u32, PathBuf)> = Vec::new();
        for dir_entry in fs::read_dir(&config.directory)? {
            let path = dir_entry?.path();
            if let Some((id, version)) = parse_segment_file_name(&path) {
                files.push((id, version, path));
            }
        }
        files.sort();

        let mut segments = BTreeMap::new();
        for (_, _, path) in files {
            let segment = Segment::open(
                path,
                config.max_entry_size,
                config.index_density,
                config.cache_size,
                Arc::clone(&codec),
            )?;
            segments.insert(segment.first_index(), Arc::new(segment));
        }

        // the log must be gap-free across segments
        let mut prev: Option<&Arc<Segment<E, C>>> = None;
        for segment in segments.values() {
            if let Some(prev) = prev {
                if segment.first_index() != prev.last_index() + 1 {
                    return Err(StorageError::InvalidDescriptor(format!(
                        "segment {} starts at index {} but segment {} ends at {}",
                        segment.id(),
                        segment.first_index(),
                        prev.id(),
                        prev.last_index()
                    )));
                }
            }
            prev = Some(segment);
        }

        let shared = Arc::new(Shared {
            config,
            codec,
            segments: RwLock::new(segments),
            open: AtomicBool::new(true),
        });

        if shared.segments().is_empty() {
            let segment = shared.create_segment(1, 1)?;
            shared.segments_mut().insert(1, segment);
        }

        let active = shared
            .segments()
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| StorageError::InvalidConfig("journal has no segments".into()))?;
        debug!(
            directory = %shared.config.directory.display(),
            segments = shared.segments().len(),
            last_index = active.last_index(),
            "journal opened"
        );

        let writer = JournalWriter::new(Arc::clone(&shared), active);
        Ok(Self { shared, writer })
    }

    /// The journal's single writer.
    pub fn writer(&mut self) -> &mut JournalWriter<E, C> {
        &mut self.writer
    }

    /// Index of the first entry in the log.
    pub fn first_index(&self) -> u64 {
        self.shared
            .segments()
            .values()
            .next()
            .map_or(1, |segment| segment.first_index())
    }

    /// Index of the last entry, or `first_index - 1` if the log is empty.
    pub fn last_index(&self) -> u64 {
        self.shared
            .segments()
            .values()
            .next_back()
            .map_or(0, |segment| segment.last_index())
    }

    pub fn is_empty(&self) -> bool {
        self.last_index() < self.first_index()
    }

    pub fn segment_count(&self) -> usize {
        self.shared.segments().len()
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Deletes every segment whose entries all precede `new_first_index`.
    /// The newest segment is always retained.
    pub fn compact(&mut self, new_first_index: u64) -> Result<(), StorageError> {
        let mut map = self.shared.segments_mut();
        let newest = map.keys().next_back().copied();
        let doomed: Vec<u64> = map
            .iter()
            .filter(|(&key, segment)| {
                Some(key) != newest && segment.last_index() < new_first_index
            })
            .map(|(&key, _)| key)
            .collect();
        for key in doomed {
            if let Some(segment) = map.remove(&key) {
                debug!(id = segment.id(), first_index = key, "compacting segment");
                segment.delete()?;
            }
        }
        Ok(())
    }

    /// Flushes and closes every segment. Outstanding readers keep their
    /// file handles and close independently.
    pub fn close(&mut self) -> Result<(), StorageError> {
        if self.shared.open.swap(false, Ordering::AcqRel) {
            for segment in self.shared.segments().values() {
                segment.close()?;
            }
        }
        Ok(())
    }
}

impl<E, C> Journal<E, C>
where
    E: Clone,
    C: Codec<E>,
{
    /// Opens a reader positioned so its first entry is `start_index` (or
    /// the first existing entry at or after it).
    pub fn open_reader(&self, start_index: u64) -> Result<JournalReader<E, C>, StorageError> {
        JournalReader::new(Arc::clone(&self.shared), start_index, false)
    }

    /// Like [`open_reader`](Journal::open_reader), but CRC mismatches
    /// and malformed records surface as [`StorageError::Corruption`]
    /// instead of reading as end-of-log.
    pub fn open_verifying_reader(
        &self,
        start_index: u64,
    ) -> Result<JournalReader<E, C>, StorageError> {
        JournalReader::new(Arc::clone(&self.shared), start_index, true)
    }
}

/// Best-effort flush on drop; errors are ignored because the data is
/// already recoverable from the segment files.
impl<E, C> Drop for Journal<E, C> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
