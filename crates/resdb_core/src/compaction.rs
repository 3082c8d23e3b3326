//! Log compaction.
//!
//! Compaction rewrites every live resource into a fresh data log
//! generation and writes a directory for it from scratch, dropping all
//! superseded entries.
//!
//! ## Invariants
//!
//! - Compaction does not change the tree
//! - The new generations are complete and synced before old ones are deleted
//! - Pending changes drained by a compaction are written by it

use crate::change::ChangeTracker;
use crate::config::Config;
use crate::directory::Directory;
use crate::error::{CoreError, CoreResult};
use crate::log::{DataLog, Slot};
use crate::stats::StorageStats;
use crate::store::StoreFiles;
use crate::tree::ResourceTree;
use crate::types::ResourceId;
use std::collections::HashMap;
use tracing::{info, warn};

/// When a log is worth compacting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionPolicy {
    /// Log size below which compaction never runs.
    pub min_size: u64,
    /// Fraction of the log that must be garbage.
    pub garbage_ratio: f64,
}

impl CompactionPolicy {
    /// Policy configured by `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_size: config.compaction_min_size,
            garbage_ratio: config.effective_garbage_ratio(),
        }
    }

    /// True if a log of `log_size` bytes with `garbage` superseded bytes
    /// should be compacted.
    #[must_use]
    pub fn should_compact(&self, log_size: u64, garbage: u64) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let threshold = self.garbage_ratio * log_size as f64;
        log_size > self.min_size && garbage as f64 > threshold
    }
}

/// Result of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Entries in the new log.
    pub entries: usize,
    /// Size of the previous log.
    pub bytes_before: u64,
    /// Size of the new log.
    pub bytes_after: u64,
    /// Garbage dropped.
    pub garbage_dropped: u64,
    /// File name of the new log.
    pub data_file: String,
}

/// Rewrites the live tree into a new log generation and swaps it in.
///
/// On failure the new files are deleted, the drained changes are put back
/// and `files` is left untouched.
pub(crate) fn compact(
    files: &mut StoreFiles,
    tree: &ResourceTree,
    changes: &ChangeTracker,
    stats: &StorageStats,
) -> CoreResult<CompactionResult> {
    let batch = changes.drain();
    let bytes_before = files.log.size()?;
    let data_generation = files.data_files.next_generation();

    let rewritten = match rewrite(files, tree, data_generation) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            let _ = files.data_files.discard(data_generation);
            changes.requeue(batch);
            return Err(e);
        }
    };
    let (log, slots) = rewritten;

    let directory = Directory::new(
        log.file_name(),
        slots.iter().map(|(&id, slot)| (id, slot.offset)).collect(),
    );
    if let Err(e) = files.write_directory(&directory) {
        let _ = files.data_files.discard(data_generation);
        changes.requeue(batch);
        return Err(e);
    }
    if let Err(e) = files.data_files.commit_rotation(data_generation) {
        // The new directory is durable, so the new log is current regardless.
        warn!(error = %e, "could not delete old data generations");
    }

    for (&id, slot) in &slots {
        tree.set_footprint(id, slot.len);
        stats.record_entry_written(u64::from(slot.len));
    }
    let bytes_after = log.size()?;
    let result = CompactionResult {
        entries: slots.len(),
        bytes_before,
        bytes_after,
        garbage_dropped: files.garbage,
        data_file: log.file_name().to_string(),
    };

    files.log = log;
    files.index = slots;
    files.garbage = 0;
    files.dirty = false;
    stats.record_compaction();
    stats.set_log_state(bytes_after, 0);
    info!(
        data_file = %result.data_file,
        entries = result.entries,
        before = bytes_before,
        after = bytes_after,
        "compacted log"
    );
    Ok(result)
}

fn rewrite(
    files: &StoreFiles,
    tree: &ResourceTree,
    generation: u32,
) -> CoreResult<(DataLog, HashMap<ResourceId, Slot>)> {
    let mut log = DataLog::create(&files.data_files.path(generation))?;
    let mut slots = HashMap::new();
    for id in tree.live_ids() {
        let Some(entry) = tree.entry(id) else {
            continue;
        };
        match log.append(&entry) {
            Ok(slot) => {
                slots.insert(id, slot);
            }
            Err(CoreError::Codec(e)) => {
                warn!(%id, path = %entry.path, error = %e, "skipping unencodable resource");
            }
            Err(e) => return Err(e),
        }
    }
    log.sync()?;
    Ok((log, slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_logs_are_never_compacted() {
        let policy = CompactionPolicy {
            min_size: 1024,
            garbage_ratio: 0.5,
        };
        assert!(!policy.should_compact(1000, 999));
        assert!(!policy.should_compact(1024, 1000));
    }

    #[test]
    fn garbage_must_exceed_ratio() {
        let policy = CompactionPolicy {
            min_size: 100,
            garbage_ratio: 0.75,
        };
        assert!(!policy.should_compact(1000, 750));
        assert!(policy.should_compact(1000, 751));
    }

    #[test]
    fn policy_clamps_configured_ratio() {
        let mut config = Config::new();
        config.garbage_ratio = 0.0;
        let policy = CompactionPolicy::from_config(&config);
        assert!((policy.garbage_ratio - 0.10).abs() < f64::EPSILON);
        assert_eq!(policy.min_size, 1024 * 1024);
    }
}
