//! Integration test utilities and end-to-end scenarios.
//!
//! [`tree_snapshot`] captures everything the engine persists about a tree,
//! so tests can compare a store before and after a restart, a compaction
//! or a rewritten log.

use resdb_core::{LeafValue, NodeFlags, ResourceDb, ResourceId};

/// Persisted state of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    /// Full path.
    pub path: String,
    /// Resource id.
    pub id: ResourceId,
    /// Declared type name.
    pub type_name: String,
    /// Element type of a list.
    pub element_type: Option<String>,
    /// Flag byte.
    pub flags: NodeFlags,
    /// Owning application.
    pub owner: Option<String>,
    /// Last modification time.
    pub last_modified: i64,
    /// Direct reference target.
    pub target: Option<ResourceId>,
    /// Value of a non-reference leaf.
    pub value: Option<LeafValue>,
}

/// Every node reachable from the top level, depth first by path. References
/// are recorded but not followed.
pub fn tree_snapshot(db: &ResourceDb) -> Vec<NodeSnapshot> {
    let mut out = Vec::new();
    let mut stack: Vec<_> = db
        .all_top_level()
        .expect("Failed to list top-level resources")
        .into_iter()
        .rev()
        .collect();
    while let Some(info) = stack.pop() {
        let value = if info.reference.is_none() && info.type_key.is_leaf() {
            db.value(info.id).ok()
        } else {
            None
        };
        if info.reference.is_none() {
            let mut children = db.children(info.id).expect("Failed to list children");
            children.sort_by(|a, b| b.path.cmp(&a.path));
            stack.extend(children);
        }
        out.push(NodeSnapshot {
            path: info.path,
            id: info.id,
            type_name: info.type_name,
            element_type: info.element_type,
            flags: info.flags,
            owner: info.owner,
            last_modified: info.last_modified,
            target: info.reference,
            value,
        });
    }
    out
}
