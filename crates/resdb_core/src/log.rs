//! The data log: append-only node snapshots addressed by byte offset.

use crate::error::{CoreError, CoreResult};
use resdb_codec::{Encode, LogEntry};
use resdb_storage::{FileBackend, StorageBackend};
use std::fmt;
use std::path::Path;
use tracing::trace;

/// Largest offset the directory format can address.
pub const MAX_OFFSET: u64 = i32::MAX as u64;

/// Where an entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Start offset in the log.
    pub offset: u64,
    /// Encoded length, the footprint of the entry.
    pub len: u32,
}

/// One data log generation.
pub struct DataLog {
    backend: Box<dyn StorageBackend>,
    file_name: String,
}

impl fmt::Debug for DataLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLog")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

impl DataLog {
    /// Wraps a backend holding the generation called `file_name`.
    pub fn new(backend: Box<dyn StorageBackend>, file_name: impl Into<String>) -> Self {
        Self {
            backend,
            file_name: file_name.into(),
        }
    }

    /// Opens an existing generation for appending.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Ok(Self::new(Box::new(backend), file_name_of(path)))
    }

    /// Creates an empty generation, replacing any file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created.
    pub fn create(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::create(path)?;
        Ok(Self::new(Box::new(backend), file_name_of(path)))
    }

    /// File name recorded in directories pointing into this log.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Encodes `entry` and appends it.
    ///
    /// # Errors
    ///
    /// Fails if the entry cannot be encoded, the log has outgrown the
    /// directory offset range, or the write fails.
    pub fn append(&mut self, entry: &LogEntry) -> CoreResult<Slot> {
        let bytes = entry.encode()?;
        let size = self.backend.size()?;
        if size > MAX_OFFSET {
            return Err(CoreError::OffsetOverflow { offset: size });
        }
        let offset = self.backend.append(&bytes)?;
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        trace!(id = entry.resource_id, offset, len, "appended entry");
        Ok(Slot { offset, len })
    }

    /// Current size including buffered bytes.
    ///
    /// # Errors
    ///
    /// Fails if the size cannot be determined.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Pushes buffered appends to the OS.
    ///
    /// # Errors
    ///
    /// Fails if the write fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        Ok(self.backend.flush()?)
    }

    /// Makes all appends durable.
    ///
    /// # Errors
    ///
    /// Fails if the write or fsync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }

    /// Reads the whole log.
    ///
    /// # Errors
    ///
    /// Fails if the read fails.
    pub fn read_all(&self) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read_all()?)
    }

    /// Decodes the entry at `offset`, returning it with its length.
    ///
    /// # Errors
    ///
    /// Fails if the read fails or the bytes do not hold a valid entry.
    pub fn entry_at(&self, offset: u64) -> CoreResult<(LogEntry, usize)> {
        let size = self.size()?;
        let tail = usize::try_from(size.saturating_sub(offset)).unwrap_or(usize::MAX);
        let bytes = self.backend.read_at(offset, tail)?;
        Ok(LogEntry::decode_at(&bytes, 0)?)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
