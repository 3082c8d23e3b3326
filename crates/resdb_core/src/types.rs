//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a resource node.
///
/// Ids are assigned in increasing order and never reused, not even across
/// restarts: boot continues numbering above the highest id on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub i32);

impl ResourceId {
    /// Creates a resource id.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw id as written to disk.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Converts an on-disk id, mapping the `-1` sentinel to `None`.
    #[must_use]
    pub const fn from_disk(raw: i32) -> Option<Self> {
        if raw < 0 {
            None
        } else {
            Some(Self(raw))
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
