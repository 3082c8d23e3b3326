//! Arena nodes and their public snapshots.

use crate::registry::ChildDecl;
use crate::types::ResourceId;
use resdb_codec::{LeafValue, LogEntry, NodeFlags, TypeKey, LIST_TYPE_NAME, NO_ID};
use serde::Serialize;
use std::collections::BTreeMap;

/// One resource in the arena. Edges are ids.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) id: ResourceId,
    pub(crate) parent: Option<ResourceId>,
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) owner: Option<String>,
    /// Declared type; the list type name for lists.
    pub(crate) type_name: String,
    /// Element type of a list, once fixed.
    pub(crate) element_type: Option<String>,
    pub(crate) type_key: TypeKey,
    pub(crate) flags: NodeFlags,
    pub(crate) last_modified: i64,
    /// Size of the latest log entry of this node.
    pub(crate) footprint: u32,
    /// Direct target of a reference.
    pub(crate) ref_id: Option<ResourceId>,
    /// Leaf value; always `None` on references.
    pub(crate) value: Option<LeafValue>,
    /// Live children by name.
    pub(crate) required: BTreeMap<String, ResourceId>,
    /// Declared but not instantiated schema slots.
    pub(crate) optional: BTreeMap<String, ChildDecl>,
}

impl Node {
    pub(crate) fn is_reference(&self) -> bool {
        self.flags.is_reference()
    }

    pub(crate) fn is_list(&self) -> bool {
        self.flags.is_list()
    }

    /// Key under which the node is found in the type index.
    pub(crate) fn index_type(&self) -> &str {
        if self.is_list() {
            LIST_TYPE_NAME
        } else {
            &self.type_name
        }
    }

    /// Log entry for this node. `location` is the node the reference chain
    /// ends at, which supplies the type of a reference.
    pub(crate) fn to_entry(&self, location: &Node) -> LogEntry {
        let type_name = if location.is_list() {
            location
                .element_type
                .clone()
                .unwrap_or_else(|| LIST_TYPE_NAME.to_string())
        } else {
            location.type_name.clone()
        };
        LogEntry {
            type_name,
            resource_id: self.id.as_i32(),
            parent_id: self.parent.map_or(NO_ID, ResourceId::as_i32),
            flags: self.flags,
            type_key: location.type_key,
            path: self.path.clone(),
            owner: self.owner.clone(),
            ref_id: self.ref_id.map_or(NO_ID, ResourceId::as_i32),
            last_modified: self.last_modified,
            value: if self.is_reference() {
                None
            } else {
                self.value.clone()
            },
        }
    }

    pub(crate) fn info(&self, location: &Node) -> NodeInfo {
        NodeInfo {
            id: self.id,
            parent: self.parent,
            name: self.name.clone(),
            path: self.path.clone(),
            owner: self.owner.clone(),
            type_name: location.type_name.clone(),
            element_type: location.element_type.clone(),
            type_key: location.type_key,
            flags: self.flags,
            active: location.flags.is_active(),
            last_modified: location.last_modified,
            footprint: self.footprint,
            reference: self.ref_id,
            location: location.id,
        }
    }
}

/// Read-only snapshot of a resource.
///
/// For a reference, the type, activity and timestamp are those of the
/// resource the reference chain ends at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    /// Resource id.
    pub id: ResourceId,
    /// Parent id, `None` for top-level resources.
    pub parent: Option<ResourceId>,
    /// Last path segment.
    pub name: String,
    /// Full path.
    pub path: String,
    /// Owning application.
    pub owner: Option<String>,
    /// Declared type name.
    pub type_name: String,
    /// Element type of a list.
    pub element_type: Option<String>,
    /// Storage type.
    pub type_key: TypeKey,
    /// Flags of this node.
    pub flags: NodeFlags,
    /// Whether the resource is active.
    pub active: bool,
    /// Last modification time in milliseconds.
    pub last_modified: i64,
    /// Size of the latest log entry.
    pub footprint: u32,
    /// Direct target if this is a reference.
    pub reference: Option<ResourceId>,
    /// Id at the end of the reference chain; `id` itself for plain nodes.
    pub location: ResourceId,
}

impl NodeInfo {
    /// True for top-level resources.
    #[must_use]
    pub fn is_toplevel(&self) -> bool {
        self.flags.is_toplevel()
    }

    /// True for lists.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.flags.is_list()
    }

    /// True for references.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.flags.is_reference()
    }

    /// True for decorators.
    #[must_use]
    pub fn is_decorator(&self) -> bool {
        self.flags.is_decorator()
    }
}
