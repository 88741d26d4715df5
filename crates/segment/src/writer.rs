//! Append path for a single segment.
//!
//! Records are serialized into a reusable scratch buffer behind an 8-byte
//! frame reservation, checksummed, and written to the pre-allocated file
//! in a single `write_all` call. Durability is the caller's choice:
//! `append` does not imply `flush`.

use byteorder::{LittleEndian, ReadBytesExt};
use cache::EntryCache;
use crc32fast::Hasher as Crc32;
use entry::{Codec, CodecError, Indexed};
use index::{Position, SparseIndex};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::warn;

use crate::format::{SegmentDescriptor, DESCRIPTOR_BYTES, FRAME_BYTES};
use crate::StorageError;

/// Single writer for a segment's tail.
///
/// Exactly one writer exists per segment. It owns the append file handle,
/// the scratch buffer, and the tail offset; the sparse index and entry
/// cache are shared with readers and updated on every append.
pub struct SegmentWriter<E, C> {
    file: File,
    codec: Arc<C>,
    index: Arc<SparseIndex>,
    cache: Arc<EntryCache<E>>,
    first_index: u64,
    max_entry_size: usize,
    max_segment_size: u64,
    /// Index of the last appended entry, `None` while the segment is empty.
    last: Option<u64>,
    /// File offset where the next record will be written.
    tail: u64,
    /// Reusable frame + payload buffer.
    scratch: Vec<u8>,
}

impl<E, C> SegmentWriter<E, C> {
    /// Wraps an open segment file, replaying existing records to rebuild
    /// the tail offset, the last index, and the sparse index.
    ///
    /// A torn record at the tail (short length, short payload, or CRC
    /// mismatch) stops the replay, so a crash mid-append is silently
    /// dropped and the next append overwrites it.
    pub(crate) fn new(
        file: File,
        descriptor: &SegmentDescriptor,
        max_entry_size: usize,
        cache: Arc<EntryCache<E>>,
        index: Arc<SparseIndex>,
        codec: Arc<C>,
    ) -> Result<Self, StorageError> {
        let mut writer = Self {
            file,
            codec,
            first_index: descriptor.first_index,
            max_entry_size,
            max_segment_size: descriptor.max_segment_size,
            last: None,
            tail: DESCRIPTOR_BYTES,
            scratch: Vec::with_capacity(max_entry_size + FRAME_BYTES as usize),
            cache,
            index,
        };
        let (tail, last) = scan_records(
            &writer.file,
            DESCRIPTOR_BYTES,
            descriptor.first_index,
            None,
            max_entry_size,
            Some(&writer.index),
        )?;
        writer.tail = tail;
        writer.last = last;
        Ok(writer)
    }

    /// Index of the last entry in the segment, or `first_index - 1` if
    /// the segment is empty.
    pub fn last_index(&self) -> u64 {
        self.last.unwrap_or(self.first_index.saturating_sub(1))
    }

    /// Index the next append will be assigned.
    pub fn next_index(&self) -> u64 {
        match self.last {
            Some(last) => last + 1,
            None => self.first_index,
        }
    }

    /// Bytes written so far, including the descriptor.
    pub fn size(&self) -> u64 {
        self.tail
    }

    /// True once not even a minimal record fits before the pre-allocated
    /// end of the file.
    pub fn is_full(&self) -> bool {
        self.tail + FRAME_BYTES >= self.max_segment_size
    }

    /// Forces previously appended records to stable storage.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Drops every entry above `last_index` and zeroes the frame header
    /// at the new tail so readers stop there. Truncating below
    /// `first_index - 1` resets the segment to empty.
    pub fn truncate(&mut self, last_index: u64) -> Result<(), StorageError> {
        if last_index >= self.last_index() {
            return Ok(());
        }
        self.cache.truncate(last_index);
        self.index.truncate(last_index);

        if last_index < self.first_index {
            self.last = None;
            self.tail = DESCRIPTOR_BYTES;
        } else {
            // jump to the nearest index point, then walk to the end of
            // the entry that becomes the new tail
            let start = self.index.lookup(last_index).unwrap_or(Position {
                index: self.first_index,
                offset: DESCRIPTOR_BYTES,
            });
            let (tail, last) = scan_records(
                &self.file,
                start.offset,
                start.index,
                Some(last_index),
                self.max_entry_size,
                None,
            )?;
            self.tail = tail;
            self.last = last.or_else(|| {
                (start.index > self.first_index).then(|| start.index - 1)
            });
        }

        if self.tail + FRAME_BYTES <= self.max_segment_size {
            self.file.seek(SeekFrom::Start(self.tail))?;
            self.file.write_all(&[0u8; FRAME_BYTES as usize])?;
        }
        self.flush()
    }
}

impl<E, C> SegmentWriter<E, C>
where
    E: Clone,
    C: Codec<E>,
{
    /// Serializes `entry`, frames it as `length | crc32 | payload`, and
    /// writes it at the tail.
    ///
    /// Fails with [`StorageError::TooLarge`] if the payload exceeds the
    /// entry limit and with [`StorageError::SegmentFull`] if the record
    /// would cross the pre-allocated end of the file. Neither leaves any
    /// trace on disk.
    pub fn append(&mut self, entry: &E) -> Result<Indexed<E>, StorageError> {
        let index = self.next_index();

        // reserve the frame header, encode behind it, fill it in after
        self.scratch.clear();
        self.scratch.extend_from_slice(&[0u8; FRAME_BYTES as usize]);
        self.codec.encode(entry, &mut self.scratch)?;
        let length = self.scratch.len() - FRAME_BYTES as usize;

        if length == 0 {
            // a zero length is the on-disk EOF sentinel
            return Err(StorageError::Codec(CodecError::Encode(
                "serialized entry is empty".into(),
            )));
        }
        if length > self.max_entry_size {
            return Err(StorageError::TooLarge {
                size: length,
                limit: self.max_entry_size,
            });
        }
        if self.tail + FRAME_BYTES + length as u64 > self.max_segment_size {
            if self.last.is_none() && self.tail == DESCRIPTOR_BYTES {
                // rolling to a fresh segment would not help either
                return Err(StorageError::TooLarge {
                    size: length,
                    limit: (self.max_segment_size - DESCRIPTOR_BYTES - FRAME_BYTES) as usize,
                });
            }
            return Err(StorageError::SegmentFull);
        }

        let mut hasher = Crc32::new();
        hasher.update(&self.scratch[FRAME_BYTES as usize..]);
        let crc = hasher.finalize();
        self.scratch[0..4].copy_from_slice(&(length as u32).to_le_bytes());
        self.scratch[4..8].copy_from_slice(&crc.to_le_bytes());

        self.file.seek(SeekFrom::Start(self.tail))?;
        self.file.write_all(&self.scratch)?;

        let offset = self.tail;
        self.tail += FRAME_BYTES + length as u64;
        self.last = Some(index);

        let indexed = Indexed::new(index, entry.clone(), length as u32);
        self.cache.put(indexed.clone());
        self.index.record(index, offset);
        Ok(indexed)
    }
}

/// Walks valid records starting at `start_offset`, which must hold entry
/// `start_index`. Stops at the first invalid record (zero or oversized
/// length, short payload, CRC mismatch) or, when `up_to` is given, after
/// consuming that entry. Feeds each position to `index` when provided.
///
/// Returns the offset just past the last valid record and the index of
/// the last record consumed.
pub(crate) fn scan_records(
    file: &File,
    start_offset: u64,
    start_index: u64,
    up_to: Option<u64>,
    max_entry_size: usize,
    index: Option<&SparseIndex>,
) -> Result<(u64, Option<u64>), StorageError> {
    let mut rdr = BufReader::new(file);
    rdr.seek(SeekFrom::Start(start_offset))?;

    let mut pos = start_offset;
    let mut next_index = start_index;
    let mut last = None;
    let mut payload = Vec::new();

    loop {
        if let Some(stop) = up_to {
            if next_index > stop {
                break;
            }
        }

        let length = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if length == 0 {
            break;
        }
        if length as usize > max_entry_size {
            warn!(index = next_index, offset = pos, length, "stopping scan at invalid record length");
            break;
        }
        let crc = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        payload.clear();
        payload.resize(length as usize, 0);
        match rdr.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(index = next_index, offset = pos, "stopping scan at short record payload");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        if hasher.finalize() != crc {
            warn!(index = next_index, offset = pos, "stopping scan at checksum mismatch");
            break;
        }

        if let Some(index) = index {
            index.record(next_index, pos);
        }
        pos += FRAME_BYTES + length as u64;
        last = Some(next_index);
        next_index += 1;
    }

    Ok((pos, last))
}
