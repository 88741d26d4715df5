use crate::format::{
    parse_segment_file_name, segment_file_name, SegmentDescriptor, DESCRIPTOR_BYTES, SEGMENT_MAGIC,
};
use crate::StorageError;
use std::io::Cursor;
use std::path::Path;

fn sample() -> SegmentDescriptor {
    SegmentDescriptor {
        id: 7,
        version: 1,
        first_index: 4093,
        max_segment_size: 4 * 1024 * 1024,
    }
}

#[test]
fn descriptor_is_exactly_descriptor_bytes() {
    let mut buf = Vec::new();
    sample().write_to(&mut buf).unwrap();
    assert_eq!(buf.len() as u64, DESCRIPTOR_BYTES);
}

#[test]
fn descriptor_roundtrip() {
    let descriptor = sample();
    let mut buf = Vec::new();
    descriptor.write_to(&mut buf).unwrap();

    let decoded = SegmentDescriptor::read_from(&mut Cursor::new(&buf)).unwrap();
    assert_eq!(decoded, descriptor);
}

#[test]
fn bad_magic_is_rejected() {
    let mut buf = Vec::new();
    sample().write_to(&mut buf).unwrap();
    buf[0] ^= 0xFF;

    let result = SegmentDescriptor::read_from(&mut Cursor::new(&buf));
    assert!(matches!(result, Err(StorageError::InvalidDescriptor(_))));
}

#[test]
fn zero_version_is_rejected() {
    let mut buf = Vec::new();
    SegmentDescriptor { version: 0, ..sample() }
        .write_to(&mut buf)
        .unwrap();

    // version 0 only round-trips as invalid
    let result = SegmentDescriptor::read_from(&mut Cursor::new(&buf));
    assert!(matches!(result, Err(StorageError::InvalidDescriptor(_))));
}

#[test]
fn undersized_segment_is_rejected() {
    let mut buf = Vec::new();
    SegmentDescriptor { max_segment_size: 32, ..sample() }
        .write_to(&mut buf)
        .unwrap();

    let result = SegmentDescriptor::read_from(&mut Cursor::new(&buf));
    assert!(matches!(result, Err(StorageError::InvalidDescriptor(_))));
}

#[test]
fn magic_is_ascii_tag() {
    assert_eq!(SEGMENT_MAGIC.to_be_bytes(), *b"RLG1");
}

#[test]
fn file_names_sort_in_creation_order() {
    let names: Vec<String> = [(1u64, 1u32), (2, 1), (10, 1), (10, 2), (100, 1)]
        .iter()
        .map(|&(id, version)| segment_file_name(id, version))
        .collect();

    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(sorted, names);
}

#[test]
fn file_name_roundtrip() {
    let name = segment_file_name(42, 3);
    let parsed = parse_segment_file_name(Path::new(&name));
    assert_eq!(parsed, Some((42, 3)));
}

#[test]
fn foreign_file_names_are_ignored() {
    assert_eq!(parse_segment_file_name(Path::new("wal.log")), None);
    assert_eq!(parse_segment_file_name(Path::new("segment.txt")), None);
    assert_eq!(parse_segment_file_name(Path::new("1-1.log")), None);
}
