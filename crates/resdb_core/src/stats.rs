//! Storage statistics.
//!
//! Counters are updated by the flusher and compactor and can be read while
//! a cycle is in progress.
//!
//! # Usage
//!
//! ```rust,ignore
//! let db = ResourceDb::open(config, registry)?;
//! db.trigger_storage()?;
//!
//! let stats = db.stats();
//! println!("Cycles: {}", stats.flush_cycles);
//! println!("Garbage: {} of {} bytes", stats.garbage_bytes, stats.log_size);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Persistence statistics.
///
/// Counters only grow; `garbage_bytes` and `log_size` are gauges.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Flush cycles that completed.
    flush_cycles: AtomicU64,
    /// Timer ticks skipped because a cycle or transaction was running.
    skipped_cycles: AtomicU64,
    /// Flush cycles aborted by an I/O failure.
    failed_cycles: AtomicU64,
    /// Log entries appended, including compaction rewrites.
    entries_written: AtomicU64,
    /// Bytes appended to data logs.
    bytes_written: AtomicU64,
    /// Deletions removed from the directory.
    deletions: AtomicU64,
    /// Compactions performed.
    compactions: AtomicU64,

    /// Superseded bytes in the current log.
    garbage_bytes: AtomicU64,
    /// Size of the current log.
    log_size: AtomicU64,
}

impl StorageStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_flush_cycle(&self) {
        self.flush_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_cycle(&self) {
        self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_cycle(&self) {
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_entry_written(&self, bytes: u64) {
        self.entries_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_deletion(&self) {
        self.deletions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_log_state(&self, log_size: u64, garbage: u64) {
        self.log_size.store(log_size, Ordering::Relaxed);
        self.garbage_bytes.store(garbage, Ordering::Relaxed);
    }

    /// Returns the number of completed flush cycles.
    pub fn flush_cycles(&self) -> u64 {
        self.flush_cycles.load(Ordering::Relaxed)
    }

    /// Returns the number of skipped timer ticks.
    pub fn skipped_cycles(&self) -> u64 {
        self.skipped_cycles.load(Ordering::Relaxed)
    }

    /// Returns the number of failed flush cycles.
    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    /// Returns the number of appended entries.
    pub fn entries_written(&self) -> u64 {
        self.entries_written.load(Ordering::Relaxed)
    }

    /// Returns the number of appended bytes.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the number of persisted deletions.
    pub fn deletions(&self) -> u64 {
        self.deletions.load(Ordering::Relaxed)
    }

    /// Returns the number of compactions.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Returns the current garbage estimate.
    pub fn garbage_bytes(&self) -> u64 {
        self.garbage_bytes.load(Ordering::Relaxed)
    }

    /// Returns the current log size.
    pub fn log_size(&self) -> u64 {
        self.log_size.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            flush_cycles: self.flush_cycles(),
            skipped_cycles: self.skipped_cycles(),
            failed_cycles: self.failed_cycles(),
            entries_written: self.entries_written(),
            bytes_written: self.bytes_written(),
            deletions: self.deletions(),
            compactions: self.compactions(),
            garbage_bytes: self.garbage_bytes(),
            log_size: self.log_size(),
        }
    }
}

/// A point-in-time copy of [`StorageStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Completed flush cycles.
    pub flush_cycles: u64,
    /// Skipped timer ticks.
    pub skipped_cycles: u64,
    /// Failed flush cycles.
    pub failed_cycles: u64,
    /// Appended entries.
    pub entries_written: u64,
    /// Appended bytes.
    pub bytes_written: u64,
    /// Persisted deletions.
    pub deletions: u64,
    /// Compactions.
    pub compactions: u64,
    /// Current garbage estimate.
    pub garbage_bytes: u64,
    /// Current log size.
    pub log_size: u64,
}
