//! Pending-change bookkeeping between tree mutations and the flusher.

use crate::types::ResourceId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Why a resource needs to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStatus {
    /// A top-level resource was created.
    NewResource,
    /// A child, decorator, list element or reference was created.
    NewSubresource,
    /// A leaf value changed.
    ValueChanged,
    /// Flags, owner, timestamp or list element type changed.
    StatusChanged,
    /// The resource was deleted.
    Deleted,
}

impl ChangeStatus {
    /// True for [`ChangeStatus::Deleted`].
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// Map of resource id to its latest pending status.
///
/// Later marks replace earlier ones, except that [`ChangeStatus::Deleted`]
/// stays until the batch is drained.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    pending: Mutex<HashMap<ResourceId, ChangeStatus>>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a change of `id`.
    pub fn mark(&self, id: ResourceId, status: ChangeStatus) {
        let mut pending = self.pending.lock();
        match pending.get(&id) {
            Some(ChangeStatus::Deleted) => {}
            _ => {
                pending.insert(id, status);
            }
        }
    }

    /// Takes all pending changes, ordered by id.
    pub fn drain(&self) -> Vec<(ResourceId, ChangeStatus)> {
        let mut batch: Vec<_> = self.pending.lock().drain().collect();
        batch.sort_unstable_by_key(|(id, _)| *id);
        batch
    }

    /// Puts back a batch that could not be written. Statuses recorded
    /// since the drain win, except that a requeued deletion still sticks.
    pub fn requeue(&self, batch: Vec<(ResourceId, ChangeStatus)>) {
        let mut pending = self.pending.lock();
        for (id, status) in batch {
            if status.is_deleted() {
                pending.insert(id, status);
            } else {
                pending.entry(id).or_insert(status);
            }
        }
    }

    /// Number of pending ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drops all pending changes.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}
