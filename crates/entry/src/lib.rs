//! # Entry - log records and the serializer seam
//!
//! The log stores caller-supplied opaque values. An [`Indexed<E>`] pairs a
//! value with the monotonic index it was appended at and its serialized
//! length on disk (excluding framing).
//!
//! Serialization is pluggable through the [`Codec`] trait: the storage
//! layer only ever sees `encode(entry) -> bytes` and `decode(bytes) ->
//! entry`. [`BytesCodec`] is the identity codec for raw `Vec<u8>` payloads
//! and is what the tests and benches use.

use thiserror::Error;

/// Errors produced by a [`Codec`] implementation.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The entry could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The payload bytes could not be deserialized.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Converts entries to and from their on-disk payload bytes.
///
/// Implementations must be stateless with respect to individual entries:
/// decoding the bytes produced by `encode` must yield an equal entry
/// regardless of what was encoded before or after it.
pub trait Codec<E>: Send + Sync {
    /// Serializes `entry`, appending the payload bytes to `buf`.
    fn encode(&self, entry: &E, buf: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Deserializes an entry from `bytes`.
    fn decode(&self, bytes: &[u8]) -> Result<E, CodecError>;
}

/// An entry together with the index it occupies in the log.
///
/// `size` is the serialized payload length in bytes, excluding the
/// 8-byte record frame. Readers use it to advance the file cursor past
/// records that were satisfied from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed<E> {
    /// Position of the entry in the log. Indices are assigned
    /// consecutively starting from the log's first index.
    pub index: u64,
    /// The decoded entry value.
    pub entry: E,
    /// Serialized payload length, excluding framing.
    pub size: u32,
}

impl<E> Indexed<E> {
    pub fn new(index: u64, entry: E, size: u32) -> Self {
        Self { index, entry, size }
    }
}

/// Identity codec for raw byte payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, entry: &Vec<u8>, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.extend_from_slice(entry);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}
