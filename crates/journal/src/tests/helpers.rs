use crate::{Journal, JournalConfig};
use entry::BytesCodec;
use std::path::{Path, PathBuf};

pub type BytesJournal = Journal<Vec<u8>, BytesCodec>;

/// Config small enough for tests but with room for a few thousand
/// records per segment.
pub fn test_config(dir: &Path) -> JournalConfig {
    JournalConfig {
        directory: dir.join("log"),
        max_entry_size: 1024,
        max_segment_size: 64 * 1024,
        index_density: 1.0,
        cache_size: 8,
    }
}

pub fn open_journal(dir: &Path) -> BytesJournal {
    Journal::open(test_config(dir), BytesCodec).unwrap()
}

pub fn entry_bytes(i: u64) -> Vec<u8> {
    format!("entry-{:04}", i).into_bytes()
}

/// Segment files in the storage directory, in lexicographic (= creation)
/// order.
pub fn segment_files(config_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(config_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "log"))
        .collect();
    files.sort();
    files
}
