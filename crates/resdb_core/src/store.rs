//! Open on-disk state of a persistent tree.

use crate::directory::Directory;
use crate::error::CoreResult;
use crate::files::FileGenerationSet;
use crate::log::{DataLog, Slot};
use crate::types::ResourceId;
use std::collections::HashMap;
use tracing::debug;

/// The current data log, its generation sets and the in-memory copy of
/// the directory.
#[derive(Debug)]
pub(crate) struct StoreFiles {
    pub(crate) dir_files: FileGenerationSet,
    pub(crate) data_files: FileGenerationSet,
    pub(crate) log: DataLog,
    /// Latest slot of every persisted resource.
    pub(crate) index: HashMap<ResourceId, Slot>,
    /// Superseded bytes in `log`.
    pub(crate) garbage: u64,
    /// The directory on disk is behind `index`.
    pub(crate) dirty: bool,
}

impl StoreFiles {
    /// Directory describing `index`.
    pub(crate) fn directory(&self) -> Directory {
        Directory::new(
            self.log.file_name(),
            self.index
                .iter()
                .map(|(&id, slot)| (id, slot.offset))
                .collect(),
        )
    }

    /// Writes `directory` as a new generation and rotates.
    pub(crate) fn write_directory(&mut self, directory: &Directory) -> CoreResult<u32> {
        let generation = self.dir_files.next_generation();
        let path = self.dir_files.path(generation);
        if let Err(e) = directory.write(&path) {
            // A leftover partial file fails validation at boot.
            let _ = self.dir_files.discard(generation);
            return Err(e);
        }
        self.dir_files.commit_rotation(generation)?;
        debug!(
            file = %self.dir_files.file_name(generation),
            entries = directory.len(),
            "wrote directory"
        );
        Ok(generation)
    }

    /// Records a fresh slot for `id`, counting the previous one as garbage.
    pub(crate) fn record_slot(&mut self, id: ResourceId, slot: Slot) {
        if let Some(previous) = self.index.insert(id, slot) {
            self.garbage += u64::from(previous.len);
        }
    }

    /// Drops `id` from the index, counting its last slot as garbage.
    pub(crate) fn forget(&mut self, id: ResourceId) -> bool {
        match self.index.remove(&id) {
            Some(previous) => {
                self.garbage += u64::from(previous.len);
                true
            }
            None => false,
        }
    }
}
