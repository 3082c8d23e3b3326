//! Failure injection for exercising I/O error paths.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct FaultState {
    /// Appends still allowed before appends start failing.
    appends_left: AtomicUsize,
    fail_flush: AtomicBool,
    injected: AtomicUsize,
}

/// Remote control for a [`FaultyBackend`].
///
/// The switch stays usable after the backend has been moved into the
/// component under test.
#[derive(Debug, Clone)]
pub struct FaultSwitch {
    state: Arc<FaultState>,
}

impl FaultSwitch {
    /// Lets `count` more appends succeed, then fails every following append.
    pub fn fail_appends_after(&self, count: usize) {
        self.state.appends_left.store(count, Ordering::SeqCst);
    }

    /// Makes `flush` and `sync` fail while set.
    pub fn set_fail_flush(&self, fail: bool) {
        self.state.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Clears every armed fault.
    pub fn heal(&self) {
        self.state.appends_left.store(usize::MAX, Ordering::SeqCst);
        self.state.fail_flush.store(false, Ordering::SeqCst);
    }

    /// Returns how many operations were failed so far.
    #[must_use]
    pub fn injected(&self) -> usize {
        self.state.injected.load(Ordering::SeqCst)
    }
}

/// A backend wrapper that fails appends or flushes on request.
///
/// Reads and size queries always go through to the inner backend.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<FaultState>,
}

impl FaultyBackend {
    /// Wraps `inner`; no fault is armed initially.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            state: Arc::new(FaultState {
                appends_left: AtomicUsize::new(usize::MAX),
                fail_flush: AtomicBool::new(false),
                injected: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns a switch controlling this backend's faults.
    #[must_use]
    pub fn switch(&self) -> FaultSwitch {
        FaultSwitch {
            state: Arc::clone(&self.state),
        }
    }

    fn inject(&self, what: &'static str) -> StorageError {
        self.state.injected.fetch_add(1, Ordering::SeqCst);
        StorageError::Injected(what)
    }
}

impl std::fmt::Debug for FaultyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyBackend")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let allowed = self
            .state
            .appends_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if !allowed {
            return Err(self.inject("append"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_flush.load(Ordering::SeqCst) {
            return Err(self.inject("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_flush.load(Ordering::SeqCst) {
            return Err(self.inject("sync"));
        }
        self.inner.sync()
    }
}
