//! Numbered file generations.
//!
//! Each logical store keeps its physical files in the store directory as
//! `<prefix><n>` with a decimal generation number:
//!
//! ```text
//! <base_path>/
//! ├─ resMap12     # previous directory generation ("old")
//! ├─ resMap13     # current directory generation ("new")
//! ├─ resData4     # previous data log
//! └─ resData5     # current data log
//! ```
//!
//! A rotation writes generation `max + 1` first and only then deletes
//! everything but the two newest, so a crash never leaves a store without
//! a complete file.

use crate::error::CoreResult;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Generations kept after a rotation.
pub const KEPT_GENERATIONS: usize = 2;

/// The generations of one logical store.
#[derive(Debug, Clone)]
pub struct FileGenerationSet {
    dir: PathBuf,
    prefix: String,
    /// Ascending.
    generations: Vec<u32>,
}

impl FileGenerationSet {
    /// Lists the generations of `prefix` present in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read.
    pub fn scan(dir: &Path, prefix: &str) -> CoreResult<Self> {
        let mut generations = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                if let Some(generation) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| parse_generation(prefix, name))
                {
                    generations.push(generation);
                }
            }
        }
        generations.sort_unstable();
        generations.dedup();
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            generations,
        })
    }

    /// File name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Present generations, ascending.
    #[must_use]
    pub fn generations(&self) -> &[u32] {
        &self.generations
    }

    /// Highest generation present.
    #[must_use]
    pub fn newest(&self) -> Option<u32> {
        self.generations.last().copied()
    }

    /// Number the next rotation will use.
    #[must_use]
    pub fn next_generation(&self) -> u32 {
        self.newest().map_or(0, |n| n.saturating_add(1))
    }

    /// File name of `generation`.
    #[must_use]
    pub fn file_name(&self, generation: u32) -> String {
        format!("{}{}", self.prefix, generation)
    }

    /// Full path of `generation`.
    #[must_use]
    pub fn path(&self, generation: u32) -> PathBuf {
        self.dir.join(self.file_name(generation))
    }

    /// Generation number of `file_name` if it belongs to this set.
    #[must_use]
    pub fn generation_of(&self, file_name: &str) -> Option<u32> {
        parse_generation(&self.prefix, file_name)
    }

    /// Records a freshly written `generation` and deletes all but the
    /// [`KEPT_GENERATIONS`] newest.
    ///
    /// # Errors
    ///
    /// Fails if an old file cannot be deleted or the directory cannot be
    /// synced.
    pub fn commit_rotation(&mut self, generation: u32) -> CoreResult<()> {
        if !self.generations.contains(&generation) {
            self.generations.push(generation);
            self.generations.sort_unstable();
        }
        sync_directory(&self.dir)?;

        let surplus = self.generations.len().saturating_sub(KEPT_GENERATIONS);
        let stale: Vec<u32> = self.generations.drain(..surplus).collect();
        for old in &stale {
            remove_if_exists(&self.path(*old))?;
            debug!(file = %self.file_name(*old), "deleted old generation");
        }
        if !stale.is_empty() {
            sync_directory(&self.dir)?;
        }
        Ok(())
    }

    /// Deletes `generation`, e.g. after a failed write.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be deleted.
    pub fn discard(&mut self, generation: u32) -> CoreResult<()> {
        self.generations.retain(|g| *g != generation);
        remove_if_exists(&self.path(generation))?;
        sync_directory(&self.dir)
    }

    /// Deletes every generation not listed in `keep`.
    ///
    /// # Errors
    ///
    /// Fails if a file cannot be deleted.
    pub fn retain_only(&mut self, keep: &[u32]) -> CoreResult<()> {
        let (kept, dropped): (Vec<u32>, Vec<u32>) =
            self.generations.iter().partition(|g| keep.contains(g));
        for generation in &dropped {
            warn!(file = %self.file_name(*generation), "deleting stale generation");
            remove_if_exists(&self.path(*generation))?;
        }
        self.generations = kept;
        if !dropped.is_empty() {
            sync_directory(&self.dir)?;
        }
        Ok(())
    }

    /// Deletes every generation.
    ///
    /// # Errors
    ///
    /// Fails if a file cannot be deleted.
    pub fn discard_all(&mut self) -> CoreResult<()> {
        self.retain_only(&[])
    }
}

/// Parses `<prefix><n>`.
#[must_use]
pub fn parse_generation(prefix: &str, file_name: &str) -> Option<u32> {
    let digits = file_name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn remove_if_exists(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Makes file creations and deletions in `dir` durable.
#[cfg(unix)]
pub(crate) fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directory entries are journaled by the file system on this platform.
#[cfg(not(unix))]
pub(crate) fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}
