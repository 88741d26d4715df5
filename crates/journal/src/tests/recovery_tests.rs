use super::helpers::*;
use crate::StorageError;
use anyhow::Result;
use segment::{DESCRIPTOR_BYTES, FRAME_BYTES};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::tempdir;

fn overwrite(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn reopen_resumes_at_the_next_index() -> Result<()> {
    let dir = tempdir()?;

    {
        let mut journal = open_journal(dir.path());
        for i in 1..=5u64 {
            journal.writer().append(&entry_bytes(i))?;
        }
        journal.writer().commit()?;
    }

    let mut journal = open_journal(dir.path());
    assert_eq!(journal.last_index(), 5);
    assert_eq!(journal.writer().append(&entry_bytes(6))?.index, 6);

    let mut reader = journal.open_reader(1)?;
    for i in 1..=6u64 {
        assert_eq!(reader.next()?.entry, entry_bytes(i));
    }
    Ok(())
}

#[test]
fn torn_tail_record_is_dropped_on_reopen() -> Result<()> {
    let dir = tempdir()?;
    let record = FRAME_BYTES + entry_bytes(1).len() as u64;

    {
        let mut journal = open_journal(dir.path());
        for i in 1..=5u64 {
            journal.writer().append(&entry_bytes(i))?;
        }
        journal.writer().commit()?;
        journal.writer().append(&entry_bytes(6))?;
    }

    // simulate a torn write: zero the last three payload bytes of the
    // sixth record
    let files = segment_files(&test_config(dir.path()).directory);
    assert_eq!(files.len(), 1);
    overwrite(&files[0], DESCRIPTOR_BYTES + 6 * record - 3, &[0u8; 3]);

    let mut journal = open_journal(dir.path());
    assert_eq!(journal.last_index(), 5);

    // the valid prefix survives, and the writer reuses index 6
    let mut reader = journal.open_reader(1)?;
    for i in 1..=5u64 {
        assert_eq!(reader.next()?.entry, entry_bytes(i));
    }
    assert!(!reader.has_next()?);

    assert_eq!(journal.writer().append(&b"retry".to_vec())?.index, 6);
    assert!(reader.has_next()?);
    assert_eq!(reader.next()?.entry, b"retry".to_vec());
    Ok(())
}

#[test]
fn reopen_recovers_multiple_segments() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(dir.path());
    config.max_segment_size = 1024;

    let n = 200u64;
    {
        let mut journal = crate::Journal::open(config.clone(), entry::BytesCodec)?;
        for i in 1..=n {
            journal.writer().append(&entry_bytes(i))?;
        }
        journal.writer().commit()?;
    }

    let mut journal: BytesJournal = crate::Journal::open(config, entry::BytesCodec)?;
    assert!(journal.segment_count() > 1);
    assert_eq!(journal.first_index(), 1);
    assert_eq!(journal.last_index(), n);

    let mut reader = journal.open_reader(1)?;
    for i in 1..=n {
        assert_eq!(reader.next()?.entry, entry_bytes(i));
    }

    assert_eq!(journal.writer().append(&entry_bytes(n + 1))?.index, n + 1);
    Ok(())
}

#[test]
fn truncation_survives_reopen() -> Result<()> {
    let dir = tempdir()?;

    {
        let mut journal = open_journal(dir.path());
        for i in 1..=10u64 {
            journal.writer().append(&entry_bytes(i))?;
        }
        journal.writer().truncate(4)?;
    }

    let mut journal = open_journal(dir.path());
    assert_eq!(journal.last_index(), 4);
    assert_eq!(journal.writer().append(&entry_bytes(5))?.index, 5);
    Ok(())
}

#[test]
fn corrupt_descriptor_fails_to_open() -> Result<()> {
    let dir = tempdir()?;

    {
        let mut journal = open_journal(dir.path());
        journal.writer().append(&entry_bytes(1))?;
    }

    let files = segment_files(&test_config(dir.path()).directory);
    overwrite(&files[0], 0, &[0xFFu8; 4]);

    let result: std::result::Result<BytesJournal, _> =
        crate::Journal::open(test_config(dir.path()), entry::BytesCodec);
    assert!(matches!(result, Err(StorageError::InvalidDescriptor(_))));
    Ok(())
}

#[test]
fn verifying_reader_surfaces_corruption() -> Result<()> {
    let dir = tempdir()?;
    let record = FRAME_BYTES + entry_bytes(1).len() as u64;

    {
        let mut journal = open_journal(dir.path());
        for i in 1..=5u64 {
            journal.writer().append(&entry_bytes(i))?;
        }
        journal.writer().commit()?;
    }

    // flip payload bytes inside the third record
    let files = segment_files(&test_config(dir.path()).directory);
    overwrite(&files[0], DESCRIPTOR_BYTES + 2 * record + FRAME_BYTES + 2, &[0xFFu8; 4]);

    let journal = open_journal(dir.path());

    // the default reader absorbs the bad record as end-of-log
    let mut reader = journal.open_reader(1)?;
    assert_eq!(reader.next()?.index, 1);
    assert_eq!(reader.next()?.index, 2);
    assert!(!reader.has_next()?);

    // the verifying reader reports it
    let mut verifying = journal.open_verifying_reader(1)?;
    verifying.next()?;
    verifying.next()?;
    assert!(matches!(
        verifying.has_next(),
        Err(StorageError::Corruption { index: 3 })
    ));
    Ok(())
}

#[test]
fn fresh_directory_bootstraps_an_empty_log() -> Result<()> {
    let dir = tempdir()?;
    let mut journal = open_journal(dir.path());

    assert!(journal.is_empty());
    assert_eq!(journal.segment_count(), 1);
    assert_eq!(journal.first_index(), 1);
    assert_eq!(journal.last_index(), 0);

    let mut reader = journal.open_reader(1)?;
    assert!(!reader.has_next()?);
    Ok(())
}

#[test]
fn sparse_positioned_read_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(dir.path());
    config.index_density = 0.1;
    config.cache_size = 16;

    {
        let mut journal = crate::Journal::open(config.clone(), entry::BytesCodec)?;
        for i in 1..=1000u64 {
            journal.writer().append(&entry_bytes(i))?;
        }
        journal.writer().commit()?;
    }

    // the sparse index is rebuilt during replay; a positioned read
    // jumps to the nearest index point and scans at most 1/density
    // entries forward
    let journal: BytesJournal = crate::Journal::open(config, entry::BytesCodec)?;
    let mut reader = journal.open_reader(873)?;
    let indexed = reader.next()?;
    assert_eq!(indexed.index, 873);
    assert_eq!(indexed.entry, entry_bytes(873));
    Ok(())
}
