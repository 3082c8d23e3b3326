//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Appends are buffered in memory until this many bytes are pending.
const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

/// A file-based storage backend with buffered appends.
///
/// Appended bytes collect in an in-process buffer that is written to the
/// file when it grows past its limit, on [`StorageBackend::flush`], or
/// before a read touches the buffered range.
///
/// # Durability
///
/// - `flush()` writes the buffer out to the OS
/// - `sync()` additionally calls `File::sync_all()`
///
/// # Example
///
/// ```no_run
/// use resdb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create(Path::new("resData3")).unwrap();
/// backend.append(b"entry").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<FileState>,
    buffer_limit: usize,
}

#[derive(Debug)]
struct FileState {
    file: File,
    /// Bytes already handed to the OS.
    written: u64,
    pending: Vec<u8>,
}

impl FileState {
    fn size(&self) -> u64 {
        self.written + self.pending.len() as u64
    }

    fn write_pending(&mut self) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.written))?;
        self.file.write_all(&self.pending)?;
        self.written += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }
}

impl FileBackend {
    /// Opens an existing file for reading and appending, creating it if
    /// it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Creates an empty file, discarding any previous content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState {
                file,
                written,
                pending: Vec::new(),
            }),
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        })
    }

    /// Sets how many appended bytes may be buffered before a write-out.
    #[must_use]
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of appended bytes not yet handed to the OS.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        let size = state.size();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        if end > state.written {
            state.write_pending()?;
        }

        state.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        state.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = self.state.get_mut();
        let offset = state.size();
        state.pending.extend_from_slice(data);
        if state.pending.len() >= self.buffer_limit {
            state.write_pending()?;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let state = self.state.get_mut();
        state.write_pending()?;
        state.file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.state.lock().size())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.flush()?;
        self.state.get_mut().file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resData0");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn appends_are_buffered_until_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resData0");

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);

        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.pending_len(), 11);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        backend.flush().unwrap();
        assert_eq!(backend.pending_len(), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 11);
    }

    #[test]
    fn read_sees_buffered_bytes() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("resData0")).unwrap();
        backend.append(b"hello world").unwrap();

        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn buffer_limit_forces_write_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resData0");
        let mut backend = FileBackend::open(&path).unwrap().with_buffer_limit(4);

        backend.append(b"ab").unwrap();
        assert_eq!(backend.pending_len(), 2);
        backend.append(b"cd").unwrap();
        assert_eq!(backend.pending_len(), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4);
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("resData0")).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { size: 5, .. })));
    }

    #[test]
    fn reopen_appends_after_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resData0");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"first").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.append(b"second").unwrap(), 5);
        assert_eq!(backend.read_all().unwrap(), b"firstsecond");
    }

    #[test]
    fn create_discards_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resMap1");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"stale").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn unsynced_bytes_are_lost_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resData0");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.sync().unwrap();
            backend.append(b"buffered").unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"durable");
    }

    proptest! {
        #[test]
        fn appends_read_back_at_their_offsets(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..32),
            limit in 1usize..256,
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("resData0");
            let mut backend = FileBackend::open(&path).unwrap().with_buffer_limit(limit);

            let mut expected = Vec::new();
            for chunk in &chunks {
                let offset = backend.append(chunk).unwrap();
                prop_assert_eq!(offset, expected.len() as u64);
                expected.extend_from_slice(chunk);
                prop_assert_eq!(backend.read_at(offset, chunk.len()).unwrap(), chunk.clone());
            }
            prop_assert_eq!(backend.size().unwrap(), expected.len() as u64);
            backend.sync().unwrap();
            drop(backend);

            let reopened = FileBackend::open(&path).unwrap();
            prop_assert_eq!(reopened.read_all().unwrap(), expected);
        }
    }
}
