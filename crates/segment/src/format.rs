//! On-disk layout constants and the fixed-width segment descriptor.
//!
//! Every segment file starts with a [`DESCRIPTOR_BYTES`]-sized header:
//!
//! ```text
//! magic (u32 LE) | version (u32 LE) | id (u64 LE) | first_index (u64 LE)
//! | max_segment_size (u64 LE) | updated (u8) | reserved padding
//! ```
//!
//! Records follow immediately after the descriptor:
//!
//! ```text
//! length (u32 LE) | crc32 (u32 LE) | payload (length bytes)
//! ```
//!
//! `length` counts the payload only. The file is pre-allocated to
//! `max_segment_size` and zero-filled, so a zero length marks the logical
//! end of data.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::path::Path;

use crate::StorageError;

/// Magic identifying a log segment file ("RLG1").
pub const SEGMENT_MAGIC: u32 = 0x524C_4731;

/// Fixed descriptor size at offset 0 of every segment file.
pub const DESCRIPTOR_BYTES: u64 = 64;

/// Frame overhead per record: length (u32) plus crc32 (u32).
pub const FRAME_BYTES: u64 = 8;

const RESERVED_BYTES: usize = (DESCRIPTOR_BYTES as usize) - 33;

/// Fixed-width header written at offset 0 of a segment file.
///
/// The `updated` byte after `max_segment_size` is reserved; it is written
/// as zero and ignored on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Monotonic segment id, assigned at creation.
    pub id: u64,
    /// Segment version, part of the filename. Starts at 1.
    pub version: u32,
    /// Logical index of the first entry in the segment.
    pub first_index: u64,
    /// Pre-allocated file size and roll-over threshold.
    pub max_segment_size: u64,
}

impl SegmentDescriptor {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), StorageError> {
        w.write_u32::<LittleEndian>(SEGMENT_MAGIC)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.id)?;
        w.write_u64::<LittleEndian>(self.first_index)?;
        w.write_u64::<LittleEndian>(self.max_segment_size)?;
        w.write_u8(0)?; // updated flag, reserved
        w.write_all(&[0u8; RESERVED_BYTES])?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, StorageError> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != SEGMENT_MAGIC {
            return Err(StorageError::InvalidDescriptor(format!(
                "bad magic {:#010x}",
                magic
            )));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version == 0 {
            return Err(StorageError::InvalidDescriptor(
                "segment version must be >= 1".into(),
            ));
        }
        let id = r.read_u64::<LittleEndian>()?;
        let first_index = r.read_u64::<LittleEndian>()?;
        let max_segment_size = r.read_u64::<LittleEndian>()?;
        if max_segment_size < DESCRIPTOR_BYTES + FRAME_BYTES {
            return Err(StorageError::InvalidDescriptor(format!(
                "max segment size {} is smaller than the descriptor",
                max_segment_size
            )));
        }
        let _updated = r.read_u8()?;
        let mut reserved = [0u8; RESERVED_BYTES];
        r.read_exact(&mut reserved)?;
        Ok(Self {
            id,
            version,
            first_index,
            max_segment_size,
        })
    }
}

/// Filename for a segment: zero-padded id and version so lexicographic
/// order matches creation order.
pub fn segment_file_name(id: u64, version: u32) -> String {
    format!("{:020}-{:010}.log", id, version)
}

/// Parses `(id, version)` back out of a segment filename, or `None` if
/// the name does not follow the convention.
pub fn parse_segment_file_name(path: &Path) -> Option<(u64, u32)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".log")?;
    let (id, version) = stem.split_once('-')?;
    if id.len() != 20 || version.len() != 10 {
        return None;
    }
    Some((id.parse().ok()?, version.parse().ok()?))
}
