mod descriptor_tests;

use crate::{Segment, SegmentDescriptor};
use entry::BytesCodec;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) type BytesSegment = Segment<Vec<u8>, BytesCodec>;

pub(crate) fn entry_bytes(i: u64) -> Vec<u8> {
    format!("entry-{:03}", i).into_bytes()
}

pub(crate) fn create_segment(
    path: PathBuf,
    first_index: u64,
    max_segment_size: u64,
    index_density: f64,
    cache_size: usize,
) -> BytesSegment {
    let descriptor = SegmentDescriptor {
        id: 1,
        version: 1,
        first_index,
        max_segment_size,
    };
    Segment::create(path, descriptor, 1024, index_density, cache_size, Arc::new(BytesCodec))
        .unwrap()
}

pub(crate) fn open_segment(path: PathBuf, index_density: f64, cache_size: usize) -> BytesSegment {
    Segment::open(path, 1024, index_density, cache_size, Arc::new(BytesCodec)).unwrap()
}
