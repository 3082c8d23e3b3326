//! Flush cycles and the background flush timer.
//!
//! A flush cycle drains the [`ChangeTracker`], appends the current state of
//! every changed resource to the data log and rewrites the directory.
//! Cycles are serialized by the lock on the open store files; a timer tick
//! that finds the lock taken or a transaction open is skipped.

use crate::change::{ChangeStatus, ChangeTracker};
use crate::compaction::{self, CompactionPolicy, CompactionResult};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::stats::StorageStats;
use crate::store::StoreFiles;
use crate::tree::ResourceTree;
use crate::types::ResourceId;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for an in-flight cycle.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

/// Shortest timer period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Persistence state shared by the engine and the flush timer.
pub(crate) struct Persistence {
    config: Config,
    tree: Arc<ResourceTree>,
    changes: Arc<ChangeTracker>,
    stats: Arc<StorageStats>,
    policy: CompactionPolicy,
    /// `None` once closed.
    files: Mutex<Option<StoreFiles>>,
    transaction: AtomicBool,
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("policy", &self.policy)
            .field("transaction", &self.transaction.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Persistence {
    pub(crate) fn new(
        config: Config,
        tree: Arc<ResourceTree>,
        changes: Arc<ChangeTracker>,
        stats: Arc<StorageStats>,
        files: StoreFiles,
    ) -> Self {
        let policy = CompactionPolicy::from_config(&config);
        if let Ok(size) = files.log.size() {
            stats.set_log_state(size, files.garbage);
        }
        Self {
            config,
            tree,
            changes,
            stats,
            policy,
            files: Mutex::new(Some(files)),
            transaction: AtomicBool::new(false),
        }
    }

    /// Runs a cycle unless one is running or a transaction is open.
    pub(crate) fn timer_tick(&self) {
        if self.transaction.load(Ordering::Acquire) {
            self.stats.record_skipped_cycle();
            debug!("transaction open, skipping flush cycle");
            return;
        }
        let Some(mut guard) = self.files.try_lock() else {
            self.stats.record_skipped_cycle();
            debug!("flush cycle still running, skipping");
            return;
        };
        let Some(files) = guard.as_mut() else {
            return;
        };
        if let Err(e) = self.cycle(files) {
            error!(error = %e, "flush cycle failed");
        }
    }

    /// Runs one cycle now, waiting for a running one to finish.
    ///
    /// Returns whether anything was written.
    pub(crate) fn trigger_storage(&self) -> CoreResult<bool> {
        let mut guard = self.files.lock();
        let files = guard.as_mut().ok_or(CoreError::NotReady)?;
        self.cycle(files)
    }

    /// Compacts regardless of the policy.
    pub(crate) fn compact(&self) -> CoreResult<CompactionResult> {
        let mut guard = self.files.lock();
        let files = guard.as_mut().ok_or(CoreError::NotReady)?;
        compaction::compact(files, &self.tree, &self.changes, &self.stats)
    }

    pub(crate) fn start_transaction(&self) {
        self.transaction.store(true, Ordering::Release);
    }

    pub(crate) fn finish_transaction(&self) {
        self.transaction.store(false, Ordering::Release);
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.transaction.load(Ordering::Acquire)
    }

    /// Runs a final cycle and closes the files.
    pub(crate) fn shutdown(&self) -> CoreResult<()> {
        let Some(mut guard) = self.files.try_lock_for(SHUTDOWN_WAIT) else {
            warn!(
                waited_ms = SHUTDOWN_WAIT.as_millis(),
                "flush cycle did not finish, closing without a final flush"
            );
            return Ok(());
        };
        let Some(mut files) = guard.take() else {
            return Ok(());
        };
        let flushed = self.cycle(&mut files);
        let synced = files.log.sync();
        info!(data_file = %files.log.file_name(), "closed store");
        flushed.and(synced)
    }

    /// Closes the files without flushing pending changes.
    pub(crate) fn abort(&self) {
        if self.files.lock().take().is_some() {
            warn!(pending = self.changes.len(), "closed store without flushing");
        }
    }

    fn cycle(&self, files: &mut StoreFiles) -> CoreResult<bool> {
        match self.run_cycle(files) {
            Ok(wrote) => {
                if wrote {
                    self.stats.record_flush_cycle();
                }
                Ok(wrote)
            }
            Err(e) => {
                self.stats.record_failed_cycle();
                Err(e)
            }
        }
    }

    fn run_cycle(&self, files: &mut StoreFiles) -> CoreResult<bool> {
        let log_size = files.log.size()?;
        if self.policy.should_compact(log_size, files.garbage) {
            match compaction::compact(files, &self.tree, &self.changes, &self.stats) {
                Ok(_) => return Ok(true),
                Err(e) => warn!(error = %e, "compaction failed, flushing into the current log"),
            }
        }

        let batch = self.changes.drain();
        if batch.is_empty() && !files.dirty {
            return Ok(false);
        }
        if let Err(e) = self.write_batch(files, &batch) {
            files.dirty = true;
            self.changes.requeue(batch);
            return Err(e);
        }
        Ok(true)
    }

    fn write_batch(
        &self,
        files: &mut StoreFiles,
        batch: &[(ResourceId, ChangeStatus)],
    ) -> CoreResult<()> {
        let mut written = 0usize;
        let mut deleted = 0usize;
        for &(id, status) in batch {
            if status.is_deleted() {
                if files.forget(id) {
                    self.stats.record_deletion();
                    deleted += 1;
                }
                continue;
            }
            let Some(entry) = self.tree.entry(id) else {
                continue;
            };
            match files.log.append(&entry) {
                Ok(slot) => {
                    if self.config.debug {
                        debug!(%id, path = %entry.path, ?status, offset = slot.offset, len = slot.len, "wrote entry");
                    }
                    files.record_slot(id, slot);
                    self.tree.set_footprint(id, slot.len);
                    self.stats.record_entry_written(u64::from(slot.len));
                    written += 1;
                }
                Err(CoreError::Codec(e)) => {
                    warn!(%id, path = %entry.path, error = %e, "skipping unencodable resource");
                }
                Err(e) => return Err(e),
            }
        }

        files.log.sync()?;
        let directory = files.directory();
        files.write_directory(&directory)?;
        files.dirty = false;

        let log_size = files.log.size()?;
        self.stats.set_log_state(log_size, files.garbage);
        debug!(written, deleted, log_size, garbage = files.garbage, "flush cycle done");
        Ok(())
    }
}

/// Background thread ticking a [`Persistence`] once per flush period.
#[derive(Debug)]
pub(crate) struct FlushTimer {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Starts the timer thread.
    pub(crate) fn start(persistence: Arc<Persistence>, period: Duration) -> CoreResult<Self> {
        let period = period.max(MIN_PERIOD);
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("resdb-flusher".into())
            .spawn(move || {
                let (stopped, wakeup) = &*thread_signal;
                let mut stopped = stopped.lock();
                while !*stopped {
                    let result = wakeup.wait_for(&mut stopped, period);
                    if *stopped {
                        break;
                    }
                    if result.timed_out() {
                        MutexGuard::unlocked(&mut stopped, || persistence.timer_tick());
                    }
                }
                debug!("flush timer stopped");
            })?;
        debug!(period_ms = period.as_millis(), "flush timer started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub(crate) fn stop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("flush timer thread panicked");
            }
        }
    }

    fn signal_stop(&self) {
        let (stopped, wakeup) = &*self.signal;
        *stopped.lock() = true;
        wakeup.notify_all();
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
