//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store backing one file generation.
///
/// # Invariants
///
/// - `append` returns the offset where the bytes start
/// - `read_at` sees every byte previously appended, flushed or not
/// - `size` includes appended bytes that are still buffered
/// - after `sync` returns, all appended bytes survive process termination
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads the whole content of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::Corrupted(format!("store of {size} bytes does not fit in memory"))
        })?;
        self.read_at(0, len)
    }

    /// Appends bytes and returns the offset they were written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered appends to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the write-out fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the logical size in bytes; the next `append` lands here.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Flushes and then forces data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;
}
