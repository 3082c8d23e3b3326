//! Boot: generation selection and tree reconstruction.
//!
//! 1. The newest directory generation that validates is selected, the next
//!    valid one is kept as fallback and every other generation is deleted.
//! 2. Entries are read in offset order and rebuilt into nodes. Entries that
//!    do not decode are skipped; nodes whose type cannot be resolved are
//!    unreachable.
//! 3. Nodes are linked in passes until a pass links nothing, so children
//!    may precede their parents and references their targets.
//! 4. Whatever is left, plus the unreachable nodes, is marked deleted and
//!    disappears from the directory on the next flush. Duplicates of a
//!    linked id are dropped and the linked node is rewritten.

use crate::change::{ChangeStatus, ChangeTracker};
use crate::config::Config;
use crate::directory::Directory;
use crate::error::{CoreError, CoreResult};
use crate::files::FileGenerationSet;
use crate::log::{DataLog, Slot};
use crate::store::StoreFiles;
use crate::tree::{Link, Node, ResourceTree};
use crate::types::ResourceId;
use resdb_codec::LogEntry;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use tracing::{debug, info, warn};

/// What boot found on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootReport {
    /// Directory file the tree was loaded from, if any was valid.
    pub directory_file: Option<String>,
    /// Current data log.
    pub data_file: String,
    /// The newest directory generation was invalid.
    pub fell_back: bool,
    /// Entries decoded from the log.
    pub entries_read: usize,
    /// Entries that failed to decode.
    pub entries_skipped: usize,
    /// Nodes linked into the tree.
    pub linked: usize,
    /// Paths of resources dropped because their type, parent or target
    /// could not be resolved, sorted.
    pub discarded: Vec<String>,
    /// Superseded bytes in the data log.
    pub garbage: u64,
}

/// Open store files plus the boot report.
#[derive(Debug)]
pub(crate) struct Recovered {
    pub(crate) files: StoreFiles,
    pub(crate) report: BootReport,
}

/// Loads the store under `config.base_path` into `tree`.
pub(crate) fn recover(
    config: &Config,
    tree: &ResourceTree,
    changes: &ChangeTracker,
) -> CoreResult<Recovered> {
    fs::create_dir_all(&config.base_path)?;
    let mut dir_files = FileGenerationSet::scan(&config.base_path, &config.directory_prefix)?;
    let mut data_files = FileGenerationSet::scan(&config.base_path, &config.data_prefix)?;

    let mut valid = Vec::new();
    for &generation in dir_files.generations().iter().rev() {
        match validate(&dir_files, &data_files, generation) {
            Ok(found) => {
                valid.push(found);
                if valid.len() == 2 {
                    break;
                }
            }
            Err(e) => warn!(
                file = %dir_files.file_name(generation),
                error = %e,
                "invalid directory generation"
            ),
        }
    }

    let Some(selected) = valid.first() else {
        return start_empty(dir_files, data_files);
    };
    let fell_back = dir_files.newest() != Some(selected.generation);
    if fell_back {
        warn!(file = %dir_files.file_name(selected.generation), "fell back to older directory");
    }

    let keep_dirs: Vec<u32> = valid.iter().map(|v| v.generation).collect();
    let keep_data: Vec<u32> = valid.iter().map(|v| v.data_generation).collect();
    dir_files.retain_only(&keep_dirs)?;
    data_files.retain_only(&keep_data)?;

    let log = DataLog::open(&data_files.path(selected.data_generation))?;
    let mut report = BootReport {
        directory_file: Some(dir_files.file_name(selected.generation)),
        data_file: log.file_name().to_string(),
        fell_back,
        ..BootReport::default()
    };
    let replayed = replay(&selected.directory, &log, tree, &mut report)?;
    let loaded = link_all(tree, replayed.nodes, &mut report);

    for &id in replayed.unreachable.keys().chain(loaded.discarded.keys()) {
        // A duplicate of a linked id: rewrite the survivor so the directory
        // points at it, instead of deleting it.
        if tree.has(id) {
            changes.mark(id, ChangeStatus::StatusChanged);
        } else {
            changes.mark(id, ChangeStatus::Deleted);
        }
    }
    report.discarded = replayed
        .unreachable
        .into_values()
        .chain(loaded.discarded.into_values())
        .collect();
    report.discarded.sort();
    for path in &report.discarded {
        warn!(%path, "discarding unreachable resource");
    }

    let max_id = selected
        .directory
        .entries
        .iter()
        .map(|(id, _)| id.as_i32())
        .max()
        .unwrap_or(0);
    tree.set_next_id(max_id.saturating_add(1));

    info!(
        directory = ?report.directory_file,
        data_file = %report.data_file,
        linked = report.linked,
        skipped = report.entries_skipped,
        discarded = report.discarded.len(),
        garbage = report.garbage,
        "loaded store"
    );

    Ok(Recovered {
        files: StoreFiles {
            dir_files,
            data_files,
            log,
            index: replayed.index,
            garbage: replayed.garbage,
            dirty: replayed.dirty,
        },
        report,
    })
}

/// A directory generation that passed validation.
#[derive(Debug)]
struct Candidate {
    generation: u32,
    directory: Directory,
    data_generation: u32,
}

/// Loads directory `generation` and checks it against its data log.
fn validate(
    dir_files: &FileGenerationSet,
    data_files: &FileGenerationSet,
    generation: u32,
) -> CoreResult<Candidate> {
    let directory = Directory::load(&dir_files.path(generation))?;
    let data_generation = data_files.generation_of(&directory.data_file).ok_or_else(|| {
        CoreError::malformed_directory(format!("foreign data file {:?}", directory.data_file))
    })?;
    let data_path = data_files.path(data_generation);
    let size = fs::metadata(&data_path)
        .map_err(|_| {
            CoreError::malformed_directory(format!("data file {} is missing", directory.data_file))
        })?
        .len();
    if let Some(last) = directory.last_offset() {
        if size <= last {
            return Err(CoreError::malformed_directory(format!(
                "offset {last} beyond data file of {size} bytes"
            )));
        }
        DataLog::open(&data_path)?
            .entry_at(last)
            .map_err(|e| CoreError::malformed_directory(format!("last entry: {e}")))?;
    }
    Ok(Candidate {
        generation,
        directory,
        data_generation,
    })
}

/// No valid directory: removes all generations and starts a fresh log.
fn start_empty(
    mut dir_files: FileGenerationSet,
    mut data_files: FileGenerationSet,
) -> CoreResult<Recovered> {
    if !dir_files.generations().is_empty() || !data_files.generations().is_empty() {
        warn!("no valid directory generation, starting with an empty store");
    }
    dir_files.discard_all()?;
    data_files.discard_all()?;

    let generation = data_files.next_generation();
    let log = DataLog::create(&data_files.path(generation))?;
    data_files.commit_rotation(generation)?;
    info!(data_file = %log.file_name(), "created empty store");

    let report = BootReport {
        data_file: log.file_name().to_string(),
        ..BootReport::default()
    };
    Ok(Recovered {
        files: StoreFiles {
            dir_files,
            data_files,
            log,
            index: HashMap::new(),
            garbage: 0,
            dirty: false,
        },
        report,
    })
}

#[derive(Debug, Default)]
struct Replayed {
    nodes: Vec<Node>,
    /// Paths of nodes whose type did not resolve.
    unreachable: BTreeMap<ResourceId, String>,
    index: HashMap<ResourceId, Slot>,
    garbage: u64,
    dirty: bool,
}

/// Decodes every directory entry, in offset order.
fn replay(
    directory: &Directory,
    log: &DataLog,
    tree: &ResourceTree,
    report: &mut BootReport,
) -> CoreResult<Replayed> {
    let mut replayed = Replayed::default();
    let mut covered_to = 0u64;
    let bytes = log.read_all()?;

    for &(id, offset) in &directory.entries {
        let decoded = decode_entry(&bytes, offset).and_then(|(entry, len)| {
            if entry.resource_id == id.as_i32() {
                Ok((entry, len))
            } else {
                Err(CoreError::malformed_directory(format!(
                    "entry at {offset} belongs to #{}",
                    entry.resource_id
                )))
            }
        });
        let (entry, len) = match decoded {
            Ok(found) => found,
            Err(e) => {
                warn!(%id, offset, error = %e, "skipping unreadable entry");
                report.entries_skipped += 1;
                replayed.dirty = true;
                continue;
            }
        };
        report.entries_read += 1;

        let len = u32::try_from(len).unwrap_or(u32::MAX);
        replayed.garbage += offset.saturating_sub(covered_to);
        covered_to = covered_to.max(offset + u64::from(len));
        replayed.index.insert(id, Slot { offset, len });

        match tree.node_from_entry(&entry, len) {
            Ok(node) => replayed.nodes.push(node),
            Err(e) => {
                debug!(%id, path = %entry.path, error = %e, "unreachable entry");
                replayed.unreachable.insert(id, entry.path);
            }
        }
    }

    // Bytes after the last entry were appended by a cycle whose directory
    // never made it to disk.
    replayed.garbage += (bytes.len() as u64).saturating_sub(covered_to);
    report.garbage = replayed.garbage;
    Ok(replayed)
}

fn decode_entry(bytes: &[u8], offset: u64) -> CoreResult<(LogEntry, usize)> {
    let at = usize::try_from(offset).map_err(|_| CoreError::OffsetOverflow { offset })?;
    Ok(LogEntry::decode_at(bytes, at)?)
}

#[derive(Debug, Default)]
struct Loaded {
    discarded: BTreeMap<ResourceId, String>,
}

/// Links nodes until a pass makes no progress.
fn link_all(tree: &ResourceTree, nodes: Vec<Node>, report: &mut BootReport) -> Loaded {
    let mut loaded = Loaded::default();
    let mut unresolved_parents: BTreeMap<ResourceId, Node> = BTreeMap::new();
    let mut unresolved_refs: BTreeMap<ResourceId, Node> = BTreeMap::new();

    let mut attempt = |node: Node,
                       parents: &mut BTreeMap<ResourceId, Node>,
                       refs: &mut BTreeMap<ResourceId, Node>,
                       loaded: &mut Loaded| {
        match tree.try_link(node) {
            Link::Linked => {
                report.linked += 1;
                true
            }
            Link::MissingParent(node) => {
                parents.insert(node.id, node);
                false
            }
            Link::MissingTarget(node) => {
                refs.insert(node.id, node);
                false
            }
            Link::Conflict(node) => {
                warn!(id = %node.id, path = %node.path, "duplicate resource on disk");
                loaded.discarded.insert(node.id, node.path);
                false
            }
        }
    };

    for node in nodes {
        attempt(node, &mut unresolved_parents, &mut unresolved_refs, &mut loaded);
    }

    let mut passes = 0usize;
    loop {
        let parked: Vec<Node> = std::mem::take(&mut unresolved_parents)
            .into_values()
            .chain(std::mem::take(&mut unresolved_refs).into_values())
            .collect();
        if parked.is_empty() {
            break;
        }
        passes += 1;
        let mut progress = false;
        for node in parked {
            progress |= attempt(node, &mut unresolved_parents, &mut unresolved_refs, &mut loaded);
        }
        if !progress {
            break;
        }
    }
    debug!(passes, "link passes done");

    for node in unresolved_parents.into_values().chain(unresolved_refs.into_values()) {
        loaded.discarded.insert(node.id, node.path);
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::{names, ChildDecl, SchemaRegistry, TypeSchema};
    use resdb_codec::{LeafValue, LogEntry, NodeFlags, TypeKey, NO_ID};
    use resdb_storage::{InMemoryBackend, StorageBackend, StorageResult};
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn registry() -> Arc<SchemaRegistry> {
        let registry = SchemaRegistry::new();
        registry
            .register(TypeSchema::complex("Room").child("temperature", ChildDecl::new(names::FLOAT)))
            .unwrap();
        Arc::new(registry)
    }

    fn fresh_tree(changes: &Arc<ChangeTracker>) -> ResourceTree {
        ResourceTree::new(
            registry(),
            Arc::new(ManualClock::new(0)),
            Some(Arc::clone(changes)),
        )
    }

    fn config(dir: &Path) -> Config {
        Config::new().base_path(dir)
    }

    fn entry(type_name: &str, id: i32, parent: i32, path: &str, key: TypeKey) -> LogEntry {
        let mut flags = NodeFlags::NONE.with(NodeFlags::TOPLEVEL, parent == NO_ID);
        flags.set(NodeFlags::LIST, key == TypeKey::List);
        LogEntry {
            type_name: type_name.into(),
            resource_id: id,
            parent_id: parent,
            flags,
            type_key: key,
            path: path.into(),
            owner: None,
            ref_id: NO_ID,
            last_modified: 5,
            value: LeafValue::default_for(key),
        }
    }

    /// Writes `entries` in the given order as `resData0` plus `resMap0`.
    fn write_store(dir: &Path, entries: &[LogEntry]) {
        let mut log = DataLog::create(&dir.join("resData0")).unwrap();
        let mut pairs = Vec::new();
        for e in entries {
            let slot = log.append(e).unwrap();
            pairs.push((ResourceId::new(e.resource_id), slot.offset));
        }
        log.sync().unwrap();
        Directory::new("resData0", pairs)
            .write(&dir.join("resMap0"))
            .unwrap();
    }

    #[test]
    fn empty_directory_creates_first_log() {
        let tmp = tempdir().unwrap();
        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let recovered = recover(&config(tmp.path()), &tree, &changes).unwrap();

        assert_eq!(recovered.report.directory_file, None);
        assert_eq!(recovered.report.data_file, "resData0");
        assert!(tmp.path().join("resData0").exists());
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn children_before_parents_are_linked() {
        let tmp = tempdir().unwrap();
        write_store(
            tmp.path(),
            &[
                entry(names::FLOAT, 2, 1, "kitchen/temperature", TypeKey::Float),
                entry("Room", 1, NO_ID, "kitchen", TypeKey::Complex),
            ],
        );
        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let recovered = recover(&config(tmp.path()), &tree, &changes).unwrap();

        assert_eq!(recovered.report.linked, 2);
        assert!(recovered.report.discarded.is_empty());
        let child = tree.by_path("kitchen/temperature").unwrap();
        assert_eq!(child.parent, Some(ResourceId::new(1)));
        assert!(tree.optional_children(ResourceId::new(1)).unwrap().is_empty());
        assert!(changes.is_empty());
        assert_eq!(recovered.files.index.len(), 2);
    }

    #[test]
    fn next_id_continues_after_highest() {
        let tmp = tempdir().unwrap();
        write_store(tmp.path(), &[entry("Room", 41, NO_ID, "hall", TypeKey::Complex)]);
        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        recover(&config(tmp.path()), &tree, &changes).unwrap();

        let id = tree.create_top_level("porch", "Room", None).unwrap();
        assert_eq!(id, ResourceId::new(42));
    }

    #[test]
    fn unknown_types_and_their_subtrees_are_discarded() {
        let tmp = tempdir().unwrap();
        write_store(
            tmp.path(),
            &[
                entry("Ghost", 1, NO_ID, "ghost", TypeKey::Complex),
                entry(names::FLOAT, 2, 1, "ghost/level", TypeKey::Float),
                entry(names::FLOAT, 3, 9, "lost/orphan", TypeKey::Float),
                entry("Room", 4, NO_ID, "kitchen", TypeKey::Complex),
            ],
        );
        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let recovered = recover(&config(tmp.path()), &tree, &changes).unwrap();

        assert_eq!(
            recovered.report.discarded,
            vec!["ghost", "ghost/level", "lost/orphan"]
        );
        assert_eq!(tree.len(), 1);
        let batch = changes.drain();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|(_, status)| status.is_deleted()));
    }

    #[test]
    fn gaps_between_entries_count_as_garbage() {
        let tmp = tempdir().unwrap();
        let room = entry("Room", 1, NO_ID, "kitchen", TypeKey::Complex);
        let mut log = DataLog::create(&tmp.path().join("resData0")).unwrap();
        let stale = log.append(&room).unwrap();
        let live = log.append(&room).unwrap();
        log.sync().unwrap();
        Directory::new("resData0", vec![(ResourceId::new(1), live.offset)])
            .write(&tmp.path().join("resMap0"))
            .unwrap();

        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let recovered = recover(&config(tmp.path()), &tree, &changes).unwrap();
        assert_eq!(recovered.report.garbage, u64::from(stale.len));
        assert_eq!(tree.info(ResourceId::new(1)).unwrap().footprint, live.len);
    }

    /// Counts bytes handed out by reads.
    struct CountingBackend {
        inner: InMemoryBackend,
        read: Arc<AtomicU64>,
    }

    impl StorageBackend for CountingBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            let bytes = self.inner.read_at(offset, len)?;
            self.read.fetch_add(bytes.len() as u64, Ordering::SeqCst);
            Ok(bytes)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }
    }

    #[test]
    fn replay_reads_the_log_once() {
        let read = Arc::new(AtomicU64::new(0));
        let backend = CountingBackend {
            inner: InMemoryBackend::new(),
            read: Arc::clone(&read),
        };
        let mut log = DataLog::new(Box::new(backend), "resData0");
        let mut pairs = Vec::new();
        for id in 1..=200 {
            let e = entry(names::FLOAT, id, NO_ID, &format!("t{id}"), TypeKey::Float);
            pairs.push((ResourceId::new(id), log.append(&e).unwrap().offset));
        }
        let directory = Directory::new("resData0", pairs);

        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let mut report = BootReport::default();
        read.store(0, Ordering::SeqCst);
        let replayed = replay(&directory, &log, &tree, &mut report).unwrap();

        assert_eq!(replayed.nodes.len(), 200);
        assert_eq!(report.entries_read, 200);
        assert_eq!(report.garbage, 0);
        assert_eq!(
            read.load(Ordering::SeqCst),
            log.size().unwrap()
        );
    }

    #[test]
    fn duplicate_id_keeps_the_linked_resource() {
        let tmp = tempdir().unwrap();
        write_store(
            tmp.path(),
            &[
                entry("Room", 1, NO_ID, "kitchen", TypeKey::Complex),
                entry("Room", 1, NO_ID, "hall", TypeKey::Complex),
            ],
        );

        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let recovered = recover(&config(tmp.path()), &tree, &changes).unwrap();
        assert!(tree.top_level("kitchen").is_some());
        assert!(tree.top_level("hall").is_none());
        assert_eq!(recovered.report.discarded, vec!["hall".to_string()]);
        assert_eq!(
            changes.drain(),
            vec![(ResourceId::new(1), ChangeStatus::StatusChanged)]
        );
        drop(recovered);

        let open = || {
            let db = crate::database::ResourceDb::new(
                config(tmp.path()),
                registry(),
                Arc::new(ManualClock::new(0)),
            );
            db.init().unwrap();
            db
        };
        let db = open();
        assert!(db.trigger_storage().unwrap());
        db.stop().unwrap();

        let db = open();
        assert!(db.top_level("kitchen").unwrap().is_some());
        let report = db.boot_report().unwrap();
        assert_eq!(report.linked, 1);
        assert!(report.discarded.is_empty());
    }

    #[test]
    fn corrupt_newest_directory_falls_back() {
        let tmp = tempdir().unwrap();
        write_store(tmp.path(), &[entry("Room", 1, NO_ID, "kitchen", TypeKey::Complex)]);
        fs::write(tmp.path().join("resMap1"), b"torn").unwrap();

        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let recovered = recover(&config(tmp.path()), &tree, &changes).unwrap();

        assert!(recovered.report.fell_back);
        assert_eq!(recovered.report.directory_file.as_deref(), Some("resMap0"));
        assert!(tree.top_level("kitchen").is_some());
        assert!(!tmp.path().join("resMap1").exists());
    }

    #[test]
    fn directory_past_end_of_log_is_rejected() {
        let tmp = tempdir().unwrap();
        write_store(tmp.path(), &[entry("Room", 1, NO_ID, "kitchen", TypeKey::Complex)]);
        Directory::new("resData0", vec![(ResourceId::new(1), 4096)])
            .write(&tmp.path().join("resMap0"))
            .unwrap();

        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let recovered = recover(&config(tmp.path()), &tree, &changes).unwrap();

        assert_eq!(recovered.report.directory_file, None);
        assert_eq!(tree.len(), 0);
        assert!(!tmp.path().join("resMap0").exists());
    }

    #[test]
    fn unreferenced_data_generations_are_deleted() {
        let tmp = tempdir().unwrap();
        write_store(tmp.path(), &[entry("Room", 1, NO_ID, "kitchen", TypeKey::Complex)]);
        fs::write(tmp.path().join("resData1"), b"half a compaction").unwrap();

        let changes = Arc::new(ChangeTracker::new());
        let tree = fresh_tree(&changes);
        let recovered = recover(&config(tmp.path()), &tree, &changes).unwrap();

        assert_eq!(recovered.files.data_files.generations(), &[0]);
        assert!(!tmp.path().join("resData1").exists());
    }
}
