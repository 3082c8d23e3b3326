//! In-memory storage backend for tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Cloning yields a handle onto the same buffer, so a test can keep one
/// handle while the engine owns another and inspect exactly what was
/// appended.
///
/// # Example
///
/// ```rust
/// use resdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.append(b"entry").unwrap();
/// assert_eq!(observer.data(), b"entry");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding existing bytes, e.g. a hand-built log.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"abc").unwrap(), 0);
        assert_eq!(backend.append(b"defg").unwrap(), 3);
        assert_eq!(backend.read_at(3, 4).unwrap(), b"defg");
    }

    #[test]
    fn clones_share_the_buffer() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();
        writer.append(b"shared").unwrap();
        assert_eq!(reader.size().unwrap(), 6);
        assert_eq!(reader.data(), b"shared");
    }

    #[test]
    fn with_data_preloads_bytes() {
        let mut backend = InMemoryBackend::with_data(vec![1, 2, 3]);
        assert_eq!(backend.append(&[4]).unwrap(), 3);
        assert_eq!(backend.data(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn read_past_end_fails() {
        let backend = InMemoryBackend::with_data(vec![0; 4]);
        assert!(matches!(
            backend.read_at(2, 3),
            Err(StorageError::ReadPastEnd { offset: 2, len: 3, size: 4 })
        ));
    }
}
