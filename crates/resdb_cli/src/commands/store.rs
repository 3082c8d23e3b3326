//! Read-only access to a store directory.

use resdb_codec::LogEntry;
use resdb_core::{Directory, FileGenerationSet};
use resdb_storage::{FileBackend, StorageBackend};
use std::path::{Path, PathBuf};

/// The generation sets found in a store directory.
#[derive(Debug)]
pub struct Store {
    /// Store directory.
    pub path: PathBuf,
    /// Directory generations.
    pub dir_files: FileGenerationSet,
    /// Data log generations.
    pub data_files: FileGenerationSet,
}

/// A directory generation with its data log loaded.
#[derive(Debug)]
pub struct Generation {
    /// Directory generation number.
    pub generation: u32,
    /// Directory file name.
    pub file: String,
    /// Decoded directory.
    pub directory: Directory,
    /// Bytes of the data log it points into.
    pub log: Vec<u8>,
}

/// One decoded directory entry.
#[derive(Debug)]
pub struct Decoded {
    /// Offset in the log.
    pub offset: u64,
    /// Id recorded in the directory.
    pub id: i32,
    /// The entry and its length, or why it failed.
    pub result: Result<(LogEntry, usize), String>,
}

impl Store {
    /// Scans `path` for the two generation sets.
    pub fn scan(
        path: &Path,
        directory_prefix: &str,
        data_prefix: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.is_dir() {
            return Err(format!("No store found at {}", path.display()).into());
        }
        Ok(Self {
            path: path.to_path_buf(),
            dir_files: FileGenerationSet::scan(path, directory_prefix)?,
            data_files: FileGenerationSet::scan(path, data_prefix)?,
        })
    }

    /// Loads directory `generation` and checks it the way boot does.
    pub fn load(&self, generation: u32) -> Result<Generation, String> {
        let file = self.dir_files.file_name(generation);
        let directory =
            Directory::load(&self.dir_files.path(generation)).map_err(|e| e.to_string())?;
        let data_generation = self
            .data_files
            .generation_of(&directory.data_file)
            .ok_or_else(|| format!("foreign data file {:?}", directory.data_file))?;
        let data_path = self.data_files.path(data_generation);
        if !data_path.is_file() {
            return Err(format!("data file {} is missing", directory.data_file));
        }
        let log = FileBackend::open(&data_path)
            .and_then(|backend| backend.read_all())
            .map_err(|e| e.to_string())?;

        if let Some(last) = directory.last_offset() {
            if last >= log.len() as u64 {
                return Err(format!(
                    "offset {last} beyond data file of {} bytes",
                    log.len()
                ));
            }
            decode(&log, last).map_err(|e| format!("last entry: {e}"))?;
        }
        Ok(Generation {
            generation,
            file,
            directory,
            log,
        })
    }

    /// Newest generation that loads, with the failures of newer ones.
    pub fn select(&self) -> (Option<Generation>, Vec<(String, String)>) {
        let mut failures = Vec::new();
        for &generation in self.dir_files.generations().iter().rev() {
            match self.load(generation) {
                Ok(found) => return (Some(found), failures),
                Err(e) => failures.push((self.dir_files.file_name(generation), e)),
            }
        }
        (None, failures)
    }
}

impl Generation {
    /// Decodes every entry the directory references, in offset order.
    pub fn entries(&self) -> Vec<Decoded> {
        self.directory
            .entries
            .iter()
            .map(|&(id, offset)| {
                let result = decode(&self.log, offset).and_then(|(entry, len)| {
                    if entry.resource_id == id.as_i32() {
                        Ok((entry, len))
                    } else {
                        Err(format!("entry belongs to #{}", entry.resource_id))
                    }
                });
                Decoded {
                    offset,
                    id: id.as_i32(),
                    result,
                }
            })
            .collect()
    }
}

fn decode(log: &[u8], offset: u64) -> Result<(LogEntry, usize), String> {
    let offset = usize::try_from(offset).map_err(|e| e.to_string())?;
    LogEntry::decode_at(log, offset).map_err(|e| e.to_string())
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use resdb_core::{names, Config, ManualClock, ResourceDb, SchemaRegistry};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    /// A store with two flushed directory generations.
    pub(crate) fn sample_store() -> TempDir {
        let tmp = tempdir().unwrap();
        let db = ResourceDb::new(
            Config::new().base_path(tmp.path()),
            Arc::new(SchemaRegistry::new()),
            Arc::new(ManualClock::new(1_000)),
        );
        db.init().unwrap();
        let x = db.create_top_level("x", names::FLOAT, None).unwrap();
        db.trigger_storage().unwrap();
        db.set_float(x, 1.5).unwrap();
        db.create_top_level("label", names::STRING, Some("app")).unwrap();
        db.stop().unwrap();
        tmp
    }

    fn scan(tmp: &TempDir) -> Store {
        Store::scan(tmp.path(), "resMap", "resData").unwrap()
    }

    #[test]
    fn selects_newest_generation() {
        let tmp = sample_store();
        let store = scan(&tmp);
        let (selected, failures) = store.select();
        let selected = selected.unwrap();
        assert!(failures.is_empty());
        assert_eq!(Some(selected.generation), store.dir_files.newest());
        assert_eq!(selected.directory.len(), 2);
        assert!(selected.entries().iter().all(|d| d.result.is_ok()));
    }

    #[test]
    fn torn_newest_generation_is_reported() {
        let tmp = sample_store();
        let store = scan(&tmp);
        let newest = store.dir_files.newest().unwrap();
        std::fs::write(store.dir_files.path(newest), b"torn").unwrap();

        let (selected, failures) = store.select();
        assert_eq!(selected.unwrap().generation, newest - 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, store.dir_files.file_name(newest));
    }

    #[test]
    fn missing_store_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(Store::scan(&tmp.path().join("nope"), "resMap", "resData").is_err());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
