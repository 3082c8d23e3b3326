//! Crash and corruption helpers.
//!
//! A killed process leaves files in one of a few shapes: a directory
//! generation that was only partly written, a data log with a torn last
//! append, or a compaction whose new log never got a directory. These
//! helpers produce those shapes on a stopped store so tests can check what
//! the next boot makes of them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use resdb_testkit::crash::{flip_byte, newest_generation};
//!
//! let newest = newest_generation(store.path(), "resMap").unwrap();
//! flip_byte(&newest, 1);
//! ```

use resdb_core::FileGenerationSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Path of the highest generation of `prefix` in `dir`.
pub fn newest_generation(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let set = FileGenerationSet::scan(dir, prefix).expect("Failed to scan store");
    set.newest().map(|generation| set.path(generation))
}

/// File names of all generations of `prefix` in `dir`, ascending.
pub fn generation_files(dir: &Path, prefix: &str) -> Vec<String> {
    let set = FileGenerationSet::scan(dir, prefix).expect("Failed to scan store");
    set.generations()
        .iter()
        .map(|&generation| set.file_name(generation))
        .collect()
}

/// Inverts the byte `from_end` bytes before the end of `path`
/// (1 is the last byte).
pub fn flip_byte(path: &Path, from_end: usize) {
    let mut bytes = fs::read(path).expect("Failed to read file");
    let at = bytes
        .len()
        .checked_sub(from_end)
        .expect("File shorter than the flip offset");
    bytes[at] ^= 0xFF;
    fs::write(path, bytes).expect("Failed to write file");
}

/// Cuts `count` bytes off the end of `path`.
pub fn truncate_by(path: &Path, count: u64) {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file");
    let len = file.metadata().expect("Failed to stat file").len();
    file.set_len(len.saturating_sub(count))
        .expect("Failed to truncate file");
}

/// Appends `bytes` to `path`, like an append whose directory never made it
/// to disk.
pub fn append_bytes(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("Failed to open file");
    file.write_all(bytes).expect("Failed to append");
    file.sync_all().expect("Failed to sync");
}

/// Copies `source` to the next generation of `prefix`, like a rotation
/// that was interrupted before its directory was written. Returns the new
/// path.
pub fn copy_to_next_generation(dir: &Path, prefix: &str, source: &Path) -> PathBuf {
    let set = FileGenerationSet::scan(dir, prefix).expect("Failed to scan store");
    let target = set.path(set.next_generation());
    fs::copy(source, &target).expect("Failed to copy generation");
    target
}
