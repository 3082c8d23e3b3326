//! The in-memory resource tree.
//!
//! Nodes live in an arena keyed by [`ResourceId`]; parent, child and
//! reference edges are ids. Indices by path, type and top-level name are
//! kept next to the arena under one lock. Every mutation is reported to the
//! [`ChangeTracker`] and picked up by the next flush cycle.

mod filter;
mod node;

pub use filter::ResourceFilter;
pub(crate) use node::Node;
pub use node::NodeInfo;

use crate::change::{ChangeStatus, ChangeTracker};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::registry::{ChildDecl, TypeRegistry, TypeSchema};
use crate::types::ResourceId;
use parking_lot::RwLock;
use resdb_codec::{LeafValue, LogEntry, NodeFlags, TypeKey, LIST_TYPE_NAME};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Outcome of linking a node loaded from disk.
#[derive(Debug)]
pub(crate) enum Link {
    /// The node is in the tree.
    Linked,
    /// The parent is not in the tree yet.
    MissingParent(Node),
    /// The reference target is not in the tree yet.
    MissingTarget(Node),
    /// The id, path or child name is taken.
    Conflict(Node),
}

#[derive(Debug, Default)]
struct TreeState {
    nodes: HashMap<ResourceId, Node>,
    by_path: HashMap<String, ResourceId>,
    /// Non-reference nodes by declared type; lists under the list type name.
    by_type: HashMap<String, BTreeSet<ResourceId>>,
    top_level: BTreeMap<String, ResourceId>,
    /// Reference ids by their direct target.
    referrers: HashMap<ResourceId, BTreeSet<ResourceId>>,
}

impl TreeState {
    fn node(&self, id: ResourceId) -> CoreResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| CoreError::not_found(id.to_string()))
    }

    fn node_mut(&mut self, id: ResourceId) -> CoreResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(id.to_string()))
    }

    /// Follows the reference chain from `id` to a plain node.
    fn location(&self, id: ResourceId) -> CoreResult<ResourceId> {
        let mut current = id;
        let mut seen = HashSet::new();
        loop {
            let node = self.node(current)?;
            match node.ref_id {
                Some(target) if node.is_reference() => {
                    if !seen.insert(current) {
                        return Err(CoreError::reference_loop(&node.path));
                    }
                    current = target;
                }
                _ => return Ok(current),
            }
        }
    }

    fn location_node(&self, id: ResourceId) -> CoreResult<&Node> {
        let location = self.location(id)?;
        self.node(location)
    }

    fn info(&self, id: ResourceId) -> Option<NodeInfo> {
        let node = self.nodes.get(&id)?;
        let location = self.location_node(id).unwrap_or(node);
        Some(node.info(location))
    }

    fn infos(&self, ids: impl IntoIterator<Item = ResourceId>) -> Vec<NodeInfo> {
        ids.into_iter().filter_map(|id| self.info(id)).collect()
    }

    fn entry(&self, id: ResourceId) -> Option<LogEntry> {
        let node = self.nodes.get(&id)?;
        let location = self.location_node(id).unwrap_or(node);
        Some(node.to_entry(location))
    }

    fn insert(&mut self, node: Node) {
        self.by_path.insert(node.path.clone(), node.id);
        if node.is_reference() {
            if let Some(target) = node.ref_id {
                self.referrers.entry(target).or_default().insert(node.id);
            }
        } else {
            self.by_type
                .entry(node.index_type().to_string())
                .or_default()
                .insert(node.id);
        }
        match node.parent {
            None => {
                self.top_level.insert(node.name.clone(), node.id);
            }
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.optional.remove(&node.name);
                    parent.required.insert(node.name.clone(), node.id);
                }
            }
        }
        self.nodes.insert(node.id, node);
    }

    fn remove(&mut self, id: ResourceId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        self.by_path.remove(&node.path);
        if node.is_reference() {
            if let Some(target) = node.ref_id {
                if let Some(set) = self.referrers.get_mut(&target) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.referrers.remove(&target);
                    }
                }
            }
        } else if let Some(set) = self.by_type.get_mut(node.index_type()) {
            set.remove(&id);
            if set.is_empty() {
                self.by_type.remove(node.index_type());
            }
        }
        match node.parent {
            None => {
                if self.top_level.get(&node.name) == Some(&id) {
                    self.top_level.remove(&node.name);
                }
            }
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    if parent.required.get(&node.name) == Some(&id) {
                        parent.required.remove(&node.name);
                    }
                }
            }
        }
        Some(node)
    }
}

/// Where and how a new child goes.
struct Placement {
    parent: ResourceId,
    path: String,
    flags: NodeFlags,
    owner: Option<String>,
    element_type: Option<String>,
    /// Set when the child fixes the element type of its list parent.
    fixes_list_type: Option<String>,
}

/// The authoritative resource tree.
pub(crate) struct ResourceTree {
    state: RwLock<TreeState>,
    registry: Arc<dyn TypeRegistry>,
    clock: Arc<dyn Clock>,
    changes: Option<Arc<ChangeTracker>>,
    next_id: AtomicI32,
}

impl fmt::Debug for ResourceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTree")
            .field("resources", &self.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ResourceTree {
    /// Creates an empty tree. Without a change tracker nothing is persisted.
    pub(crate) fn new(
        registry: Arc<dyn TypeRegistry>,
        clock: Arc<dyn Clock>,
        changes: Option<Arc<ChangeTracker>>,
    ) -> Self {
        Self {
            state: RwLock::new(TreeState::default()),
            registry,
            clock,
            changes,
            next_id: AtomicI32::new(1),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<dyn TypeRegistry> {
        &self.registry
    }

    fn mark(&self, id: ResourceId, status: ChangeStatus) {
        if let Some(changes) = &self.changes {
            changes.mark(id, status);
        }
    }

    fn allocate_id(&self) -> ResourceId {
        ResourceId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Continues id assignment at `next` unless it is already higher.
    pub(crate) fn set_next_id(&self, next: i32) {
        self.next_id.fetch_max(next, Ordering::Relaxed);
    }

    fn validate_name(name: &str) -> CoreResult<()> {
        if name.is_empty() || name.contains('/') {
            return Err(CoreError::invalid_name(name));
        }
        Ok(())
    }

    /// Rejects a string the log cannot carry, before anything changes in
    /// memory.
    fn check_encodable(what: &str, text: &str) -> CoreResult<()> {
        let len = resdb_codec::mutf8::encoded_len(text);
        if len > resdb_codec::MAX_STRING_LEN {
            return Err(CoreError::string_too_long(what, len));
        }
        Ok(())
    }

    fn check_value_encodable(path: &str, value: &LeafValue) -> CoreResult<()> {
        match value {
            LeafValue::String(Some(text)) => Self::check_encodable(path, text),
            LeafValue::StringArray(items) => items
                .iter()
                .flatten()
                .try_for_each(|text| Self::check_encodable(path, text)),
            _ => Ok(()),
        }
    }

    fn build_node(&self, id: ResourceId, name: &str, schema: &TypeSchema, at: Placement) -> Node {
        let is_list = schema.type_key() == TypeKey::List;
        Node {
            id,
            parent: Some(at.parent),
            name: name.to_string(),
            path: at.path,
            owner: at.owner,
            type_name: schema.name().to_string(),
            element_type: at.element_type,
            type_key: schema.type_key(),
            flags: at.flags.with(NodeFlags::LIST, is_list),
            last_modified: self.clock.now_millis(),
            footprint: 0,
            ref_id: None,
            value: LeafValue::default_for(schema.type_key()),
            required: BTreeMap::new(),
            optional: if is_list {
                BTreeMap::new()
            } else {
                schema.children().clone()
            },
        }
    }

    /// Creates a top-level resource.
    pub(crate) fn create_top_level(
        &self,
        name: &str,
        type_name: &str,
        owner: Option<&str>,
    ) -> CoreResult<ResourceId> {
        Self::validate_name(name)?;
        Self::check_encodable("path", name)?;
        if let Some(owner) = owner {
            Self::check_encodable("owner", owner)?;
        }
        let schema = self.registry.resolve(type_name)?;

        let mut state = self.state.write();
        if state.top_level.contains_key(name) || state.by_path.contains_key(name) {
            return Err(CoreError::already_exists(name));
        }
        let id = self.allocate_id();
        let mut node = self.build_node(
            id,
            name,
            &schema,
            Placement {
                parent: id,
                path: name.to_string(),
                flags: NodeFlags::TOPLEVEL,
                owner: owner.map(str::to_string),
                element_type: None,
                fixes_list_type: None,
            },
        );
        node.parent = None;
        state.insert(node);
        self.mark(id, ChangeStatus::NewResource);
        Ok(id)
    }

    /// Works out where a child named `name` of type `candidate` goes under
    /// `parent`, checking the parent's schema or list element type.
    fn place(
        &self,
        state: &TreeState,
        parent: ResourceId,
        name: &str,
        candidate: &str,
        candidate_is_list: bool,
        decorating: bool,
    ) -> CoreResult<Placement> {
        let parent = state.location_node(parent)?;
        let path = format!("{}/{}", parent.path, name);
        Self::check_encodable("path", &path)?;
        if parent.required.contains_key(name) || state.by_path.contains_key(&path) {
            return Err(CoreError::already_exists(path));
        }

        let mut placement = Placement {
            parent: parent.id,
            path,
            flags: NodeFlags::NONE.with(NodeFlags::DECORATOR, decorating),
            owner: parent.owner.clone(),
            element_type: None,
            fixes_list_type: None,
        };

        if parent.is_list() {
            placement
                .flags
                .set(NodeFlags::NONPERSISTENT, parent.flags.is_nonpersistent());
            if decorating {
                return Ok(placement);
            }
            if candidate_is_list {
                return Err(CoreError::invalid_type(format!(
                    "{}: list elements cannot be lists",
                    placement.path
                )));
            }
            match &parent.element_type {
                None => placement.fixes_list_type = Some(candidate.to_string()),
                Some(element) if self.registry.is_assignable(element, candidate) => {}
                Some(element) => {
                    return Err(CoreError::invalid_type(format!(
                        "{}: {candidate} is not a {element}",
                        placement.path
                    )))
                }
            }
            return Ok(placement);
        }

        match (parent.optional.get(name), decorating) {
            (Some(_), true) => Err(CoreError::already_exists(format!(
                "{} is declared by {}",
                placement.path, parent.type_name
            ))),
            (None, true) => Ok(placement),
            (None, false) => Err(CoreError::not_found(format!(
                "{}: {} declares no child {name}",
                placement.path, parent.type_name
            ))),
            (Some(decl), false) => {
                if decl.is_list() != candidate_is_list
                    || (!decl.is_list() && !self.registry.is_assignable(&decl.type_name, candidate))
                {
                    return Err(CoreError::invalid_type(format!(
                        "{}: {candidate} is not a {}",
                        placement.path, decl.type_name
                    )));
                }
                placement
                    .flags
                    .set(NodeFlags::NONPERSISTENT, decl.nonpersistent);
                placement.element_type = decl.element_type.clone();
                Ok(placement)
            }
        }
    }

    fn fix_list_type(&self, state: &mut TreeState, list: ResourceId, element: Option<String>) {
        if let Some(element) = element {
            if let Ok(node) = state.node_mut(list) {
                node.element_type = Some(element);
                self.mark(list, ChangeStatus::StatusChanged);
            }
        }
    }

    /// Adds a child. On a reference, the child is added to the target.
    pub(crate) fn add_child(
        &self,
        parent: ResourceId,
        name: &str,
        type_name: &str,
        decorating: bool,
    ) -> CoreResult<ResourceId> {
        Self::validate_name(name)?;
        let schema = self.registry.resolve(type_name)?;
        let is_list = schema.type_key() == TypeKey::List;

        let mut state = self.state.write();
        let placement = self.place(&state, parent, name, schema.name(), is_list, decorating)?;
        let parent = placement.parent;
        let fixes = placement.fixes_list_type.clone();

        let id = self.allocate_id();
        let node = self.build_node(id, name, &schema, placement);
        state.insert(node);
        self.fix_list_type(&mut state, parent, fixes);
        self.mark(id, ChangeStatus::NewSubresource);
        Ok(id)
    }

    /// Adds a reference named `name` under `parent` pointing at `target`.
    pub(crate) fn add_reference(
        &self,
        parent: ResourceId,
        name: &str,
        target: ResourceId,
        decorating: bool,
    ) -> CoreResult<ResourceId> {
        Self::validate_name(name)?;
        let mut state = self.state.write();

        // location() walks the target's reference chain and reports loops.
        let location = state.location_node(target)?;
        let (type_name, element_type, type_key, is_list) = (
            location.type_name.clone(),
            location.element_type.clone(),
            location.type_key,
            location.is_list(),
        );
        let candidate = if is_list {
            element_type.clone().unwrap_or_else(|| LIST_TYPE_NAME.to_string())
        } else {
            type_name.clone()
        };

        let mut placement = self.place(&state, parent, name, &candidate, is_list, decorating)?;
        if is_list && !decorating {
            if let Some(declared) = &placement.element_type {
                if element_type
                    .as_deref()
                    .is_some_and(|element| !self.registry.is_assignable(declared, element))
                {
                    return Err(CoreError::invalid_type(format!(
                        "{}: list of {candidate} is not a list of {declared}",
                        placement.path
                    )));
                }
            }
        }
        let parent = placement.parent;
        let fixes = placement.fixes_list_type.take();
        let id = self.allocate_id();
        let node = Node {
            id,
            parent: Some(parent),
            name: name.to_string(),
            path: placement.path,
            owner: placement.owner,
            type_name,
            element_type,
            type_key,
            flags: placement
                .flags
                .with(NodeFlags::REFERENCE, true)
                .with(NodeFlags::LIST, is_list),
            last_modified: self.clock.now_millis(),
            footprint: 0,
            ref_id: Some(target),
            value: None,
            required: BTreeMap::new(),
            optional: BTreeMap::new(),
        };
        state.insert(node);
        self.fix_list_type(&mut state, parent, fixes);
        self.mark(id, ChangeStatus::NewSubresource);
        Ok(id)
    }

    /// Deletes `id` with its subtree and every reference into it.
    ///
    /// A deleted schema child leaves its declared slot behind in the
    /// parent's optional children.
    pub(crate) fn delete(&self, id: ResourceId) -> CoreResult<()> {
        let mut state = self.state.write();
        state.node(id)?;

        let mut doomed = Vec::new();
        let mut seen = HashSet::new();
        let mut roots = vec![id];
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            doomed.push(current);
            if let Some(node) = state.nodes.get(&current) {
                stack.extend(node.required.values().copied());
            }
            if let Some(referrers) = state.referrers.get(&current) {
                for &referrer in referrers {
                    roots.push(referrer);
                    stack.push(referrer);
                }
            }
        }

        let mut slots = Vec::new();
        for root in roots {
            let Some(node) = state.nodes.get(&root) else {
                continue;
            };
            let Some(parent_id) = node.parent else {
                continue;
            };
            if node.flags.is_decorator() || seen.contains(&parent_id) {
                continue;
            }
            let Some(parent) = state.nodes.get(&parent_id) else {
                continue;
            };
            if parent.is_list() {
                continue;
            }
            if let Some(decl) = self
                .registry
                .resolve(&parent.type_name)
                .ok()
                .and_then(|schema| schema.child_decl(&node.name).cloned())
            {
                slots.push((parent_id, node.name.clone(), decl));
            }
        }

        for doomed_id in doomed {
            if state.remove(doomed_id).is_some() {
                self.mark(doomed_id, ChangeStatus::Deleted);
            }
        }
        for (parent, name, decl) in slots {
            if let Some(parent) = state.nodes.get_mut(&parent) {
                if !parent.required.contains_key(&name) {
                    parent.optional.insert(name, decl);
                }
            }
        }
        Ok(())
    }

    /// Snapshot of `id`.
    pub(crate) fn info(&self, id: ResourceId) -> Option<NodeInfo> {
        self.state.read().info(id)
    }

    /// True if `id` is in the tree.
    pub(crate) fn has(&self, id: ResourceId) -> bool {
        self.state.read().nodes.contains_key(&id)
    }

    /// Number of resources.
    pub(crate) fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Resource at `path`.
    pub(crate) fn by_path(&self, path: &str) -> Option<NodeInfo> {
        let state = self.state.read();
        let id = *state.by_path.get(path.trim_end_matches('/'))?;
        state.info(id)
    }

    /// Top-level resource `name`.
    pub(crate) fn top_level(&self, name: &str) -> Option<NodeInfo> {
        let state = self.state.read();
        let id = *state.top_level.get(name)?;
        state.info(id)
    }

    /// All top-level resources, by name.
    pub(crate) fn all_top_level(&self) -> Vec<NodeInfo> {
        let state = self.state.read();
        state.infos(state.top_level.values().copied())
    }

    /// Live children of `id`, or of its target if `id` is a reference.
    pub(crate) fn children(&self, id: ResourceId) -> CoreResult<Vec<NodeInfo>> {
        let state = self.state.read();
        let node = state.location_node(id)?;
        Ok(state.infos(node.required.values().copied()))
    }

    /// Live child `name` of `id`.
    pub(crate) fn child(&self, id: ResourceId, name: &str) -> CoreResult<Option<NodeInfo>> {
        let state = self.state.read();
        let node = state.location_node(id)?;
        Ok(node.required.get(name).and_then(|child| state.info(*child)))
    }

    /// Declared but not instantiated children of `id`.
    pub(crate) fn optional_children(
        &self,
        id: ResourceId,
    ) -> CoreResult<BTreeMap<String, ChildDecl>> {
        let state = self.state.read();
        Ok(state.location_node(id)?.optional.clone())
    }

    /// Id at the end of the reference chain starting at `id`.
    pub(crate) fn location(&self, id: ResourceId) -> CoreResult<ResourceId> {
        self.state.read().location(id)
    }

    /// Value of a leaf resource.
    pub(crate) fn value(&self, id: ResourceId) -> CoreResult<LeafValue> {
        let state = self.state.read();
        let node = state.location_node(id)?;
        node.value
            .clone()
            .ok_or_else(|| CoreError::invalid_type(format!("{} holds no value", node.path)))
    }

    /// Replaces the value of a leaf resource.
    pub(crate) fn set_value(&self, id: ResourceId, value: LeafValue) -> CoreResult<()> {
        let now = self.clock.now_millis();
        let mut state = self.state.write();
        let location = state.location(id)?;
        let node = state.node_mut(location)?;
        if node.value.is_none() || node.type_key != value.type_key() {
            return Err(CoreError::invalid_type(format!(
                "{} is {}, not {}",
                node.path,
                node.type_key,
                value.type_key()
            )));
        }
        Self::check_value_encodable(&node.path, &value)?;
        node.value = Some(value);
        node.last_modified = now;
        if !node.flags.is_nonpersistent() {
            self.mark(location, ChangeStatus::ValueChanged);
        }
        Ok(())
    }

    /// Active flag of `id` or its target.
    pub(crate) fn is_active(&self, id: ResourceId) -> CoreResult<bool> {
        Ok(self.state.read().location_node(id)?.flags.is_active())
    }

    /// Sets the active flag of `id` or its target.
    pub(crate) fn set_active(&self, id: ResourceId, active: bool) -> CoreResult<()> {
        let mut state = self.state.write();
        let location = state.location(id)?;
        let node = state.node_mut(location)?;
        if node.flags.is_active() != active {
            node.flags.set(NodeFlags::ACTIVE, active);
            self.mark(location, ChangeStatus::StatusChanged);
        }
        Ok(())
    }

    /// Sets the owner of `id` itself.
    pub(crate) fn set_owner(&self, id: ResourceId, owner: Option<&str>) -> CoreResult<()> {
        if let Some(owner) = owner {
            Self::check_encodable("owner", owner)?;
        }
        let mut state = self.state.write();
        let node = state.node_mut(id)?;
        node.owner = owner.map(str::to_string);
        self.mark(id, ChangeStatus::StatusChanged);
        Ok(())
    }

    /// Overrides the modification time of `id` or its target.
    pub(crate) fn set_last_modified(&self, id: ResourceId, millis: i64) -> CoreResult<()> {
        let mut state = self.state.write();
        let location = state.location(id)?;
        state.node_mut(location)?.last_modified = millis;
        self.mark(location, ChangeStatus::StatusChanged);
        Ok(())
    }

    /// Element type of a list, `None` while unset.
    pub(crate) fn list_element_type(&self, id: ResourceId) -> CoreResult<Option<String>> {
        let state = self.state.read();
        let node = state.location_node(id)?;
        if !node.is_list() {
            return Err(CoreError::invalid_type(format!("{} is not a list", node.path)));
        }
        Ok(node.element_type.clone())
    }

    /// Fixes the element type of a list. Existing elements must fit.
    pub(crate) fn set_list_element_type(&self, id: ResourceId, element: &str) -> CoreResult<()> {
        let schema = self.registry.resolve(element)?;
        if schema.type_key() == TypeKey::List {
            return Err(CoreError::invalid_type(format!(
                "{element}: list elements cannot be lists"
            )));
        }

        let mut state = self.state.write();
        let location = state.location(id)?;
        let list = state.node(location)?;
        if !list.is_list() {
            return Err(CoreError::invalid_type(format!("{} is not a list", list.path)));
        }
        if list.element_type.as_deref() == Some(element) {
            return Ok(());
        }
        for child in list.required.values() {
            let child = state.location_node(*child)?;
            if !child.flags.is_decorator() && !self.registry.is_assignable(element, &child.type_name)
            {
                return Err(CoreError::invalid_type(format!(
                    "{}: element {} is not a {element}",
                    list.path, child.name
                )));
            }
        }
        state.node_mut(location)?.element_type = Some(element.to_string());
        self.mark(location, ChangeStatus::StatusChanged);
        Ok(())
    }

    /// Non-reference resources assignable to `type_name`, by id.
    pub(crate) fn of_type(&self, type_name: &str) -> Vec<NodeInfo> {
        let state = self.state.read();
        let mut ids: Vec<ResourceId> = state
            .by_type
            .iter()
            .filter(|(indexed, _)| self.registry.is_assignable(type_name, indexed))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        ids.sort_unstable();
        state.infos(ids)
    }

    /// Resources matching `filter`, by path.
    pub(crate) fn filter(&self, filter: &ResourceFilter) -> Vec<NodeInfo> {
        let state = self.state.read();
        let mut matches: Vec<NodeInfo> = state
            .nodes
            .values()
            .filter(|node| filter.matches_path(&node.path))
            .filter(|node| filter.matches_owner(node.owner.as_deref()))
            .filter_map(|node| state.info(node.id))
            .filter(|info| {
                filter.type_name.as_deref().map_or(true, |wanted| {
                    self.registry.is_assignable(wanted, &info.type_name)
                })
            })
            .collect();
        matches.sort_by(|a, b| a.path.cmp(&b.path));
        matches
    }

    /// Log entry describing the current state of `id`.
    pub(crate) fn entry(&self, id: ResourceId) -> Option<LogEntry> {
        self.state.read().entry(id)
    }

    /// All ids in the tree, ascending.
    pub(crate) fn live_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.state.read().nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn set_footprint(&self, id: ResourceId, footprint: u32) {
        if let Some(node) = self.state.write().nodes.get_mut(&id) {
            node.footprint = footprint;
        }
    }

    /// Rebuilds a node from a log entry, resolving its type.
    ///
    /// # Errors
    ///
    /// Fails if the type or list element type is unknown, or if the entry
    /// contradicts its own flags.
    pub(crate) fn node_from_entry(&self, entry: &LogEntry, footprint: u32) -> CoreResult<Node> {
        let inconsistent = |what: &str| {
            CoreError::invalid_type(format!("{}: {what}", entry.path))
        };
        let id = ResourceId::from_disk(entry.resource_id).ok_or_else(|| inconsistent("no id"))?;
        let parent = ResourceId::from_disk(entry.parent_id);
        if entry.flags.is_toplevel() != parent.is_none() {
            return Err(inconsistent("top-level flag and parent disagree"));
        }
        let is_reference = entry.flags.is_reference();
        let ref_id = if is_reference {
            Some(ResourceId::from_disk(entry.ref_id).ok_or_else(|| inconsistent("no target"))?)
        } else {
            None
        };

        let (type_name, element_type, optional) = if entry.flags.is_list() {
            if entry.type_key != TypeKey::List {
                return Err(inconsistent("list flag on a non-list type"));
            }
            let element = if entry.type_name == LIST_TYPE_NAME {
                None
            } else {
                self.registry.resolve(&entry.type_name)?;
                Some(entry.type_name.clone())
            };
            (LIST_TYPE_NAME.to_string(), element, BTreeMap::new())
        } else {
            let schema = self.registry.resolve(&entry.type_name)?;
            if schema.type_key() != entry.type_key {
                return Err(inconsistent("type key does not match the registered type"));
            }
            let optional = if is_reference {
                BTreeMap::new()
            } else {
                schema.children().clone()
            };
            (schema.name().to_string(), None, optional)
        };

        let value = if is_reference {
            None
        } else {
            entry
                .value
                .clone()
                .or_else(|| LeafValue::default_for(entry.type_key))
        };

        Ok(Node {
            id,
            parent,
            name: entry.name().to_string(),
            path: entry.path.clone(),
            owner: entry.owner.clone(),
            type_name,
            element_type,
            type_key: entry.type_key,
            flags: entry.flags,
            last_modified: entry.last_modified,
            footprint,
            ref_id,
            value,
            required: BTreeMap::new(),
            optional,
        })
    }

    /// Inserts a node loaded from disk if its parent and target are
    /// present. Does not record a change.
    pub(crate) fn try_link(&self, node: Node) -> Link {
        let mut state = self.state.write();
        if state.nodes.contains_key(&node.id) || state.by_path.contains_key(&node.path) {
            return Link::Conflict(node);
        }
        match node.parent {
            None => {
                if state.top_level.contains_key(&node.name) {
                    return Link::Conflict(node);
                }
            }
            Some(parent) => match state.nodes.get(&parent) {
                None => return Link::MissingParent(node),
                Some(parent) if parent.is_reference() || parent.required.contains_key(&node.name) => {
                    return Link::Conflict(node)
                }
                Some(_) => {}
            },
        }
        if let Some(target) = node.ref_id {
            if !state.nodes.contains_key(&target) {
                return Link::MissingTarget(node);
            }
        }
        state.insert(node);
        Link::Linked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::{names, SchemaRegistry};

    fn registry() -> Arc<SchemaRegistry> {
        let registry = SchemaRegistry::new();
        registry
            .register(
                TypeSchema::complex("Device")
                    .child("on", ChildDecl::new(names::BOOLEAN))
                    .child("power", ChildDecl::new(names::FLOAT)),
            )
            .unwrap();
        registry
            .register(
                TypeSchema::complex("Thermostat")
                    .extends("Device")
                    .child("target", ChildDecl::new(names::FLOAT)),
            )
            .unwrap();
        registry
            .register(
                TypeSchema::complex("Room")
                    .child("temperature", ChildDecl::new(names::FLOAT))
                    .child("name", ChildDecl::new(names::STRING))
                    .child("noise", ChildDecl::new(names::FLOAT).nonpersistent())
                    .child("devices", ChildDecl::list_of("Device"))
                    .child("heater", ChildDecl::new("Device")),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn fresh() -> (ResourceTree, Arc<ChangeTracker>) {
        let changes = Arc::new(ChangeTracker::new());
        let tree = ResourceTree::new(
            registry(),
            Arc::new(ManualClock::new(1000)),
            Some(Arc::clone(&changes)),
        );
        (tree, changes)
    }

    #[test]
    fn top_level_creation() {
        let (tree, changes) = fresh();
        let room = tree.create_top_level("room", "Room", Some("app")).unwrap();

        let info = tree.info(room).unwrap();
        assert_eq!(info.path, "room");
        assert!(info.is_toplevel());
        assert!(!info.active);
        assert_eq!(info.owner.as_deref(), Some("app"));
        assert_eq!(changes.drain(), vec![(room, ChangeStatus::NewResource)]);

        assert!(matches!(
            tree.create_top_level("room", "Room", None),
            Err(CoreError::ResourceAlreadyExists { .. })
        ));
        assert!(matches!(
            tree.create_top_level("a/b", "Room", None),
            Err(CoreError::InvalidName { .. })
        ));
        assert!(matches!(
            tree.create_top_level("x", "Unknown", None),
            Err(CoreError::UnresolvableType { .. })
        ));
    }

    #[test]
    fn schema_children_move_from_optional_to_required() {
        let (tree, _) = fresh();
        let room = tree.create_top_level("room", "Room", Some("app")).unwrap();
        assert!(tree.optional_children(room).unwrap().contains_key("temperature"));

        let temp = tree
            .add_child(room, "temperature", names::FLOAT, false)
            .unwrap();
        let info = tree.info(temp).unwrap();
        assert_eq!(info.path, "room/temperature");
        assert_eq!(info.owner.as_deref(), Some("app"));
        assert!(!tree.optional_children(room).unwrap().contains_key("temperature"));
        assert_eq!(tree.child(room, "temperature").unwrap().unwrap().id, temp);
        assert_eq!(tree.value(temp).unwrap(), LeafValue::Float(0.0));
    }

    #[test]
    fn add_child_checks_schema() {
        let (tree, _) = fresh();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        assert!(matches!(
            tree.add_child(room, "temperature", names::INTEGER, false),
            Err(CoreError::InvalidResourceType { .. })
        ));
        assert!(matches!(
            tree.add_child(room, "undeclared", names::FLOAT, false),
            Err(CoreError::ResourceNotFound { .. })
        ));
        assert!(matches!(
            tree.add_child(room, "temperature", names::FLOAT, true),
            Err(CoreError::ResourceAlreadyExists { .. })
        ));
        tree.add_child(room, "heater", "Thermostat", false).unwrap();
        assert!(matches!(
            tree.add_child(room, "heater", "Device", false),
            Err(CoreError::ResourceAlreadyExists { .. })
        ));

        let extra = tree.add_child(room, "extra", names::TIME, true).unwrap();
        assert!(tree.info(extra).unwrap().is_decorator());
    }

    #[test]
    fn list_fixes_element_type_on_first_child() {
        let (tree, changes) = fresh();
        let list = tree.create_top_level("devices", names::LIST, None).unwrap();
        assert_eq!(tree.list_element_type(list).unwrap(), None);
        changes.clear();

        tree.add_child(list, "d0", "Thermostat", false).unwrap();
        assert_eq!(
            tree.list_element_type(list).unwrap().as_deref(),
            Some("Thermostat")
        );
        assert!(changes
            .drain()
            .contains(&(list, ChangeStatus::StatusChanged)));

        assert!(matches!(
            tree.add_child(list, "d1", "Device", false),
            Err(CoreError::InvalidResourceType { .. })
        ));
        assert!(matches!(
            tree.add_child(list, "d1", names::LIST, false),
            Err(CoreError::InvalidResourceType { .. })
        ));
        tree.add_child(list, "note", names::STRING, true).unwrap();
    }

    #[test]
    fn declared_list_child_carries_element_type() {
        let (tree, _) = fresh();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        let devices = tree.add_child(room, "devices", names::LIST, false).unwrap();
        assert_eq!(
            tree.list_element_type(devices).unwrap().as_deref(),
            Some("Device")
        );
        tree.add_child(devices, "t", "Thermostat", false).unwrap();
        assert!(matches!(
            tree.add_child(room, "temperature", names::LIST, false),
            Err(CoreError::InvalidResourceType { .. })
        ));
    }

    #[test]
    fn references_share_value_and_activity() {
        let (tree, changes) = fresh();
        let sensor = tree.create_top_level("sensor", names::FLOAT, None).unwrap();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        let alias = tree.add_reference(room, "temperature", sensor, false).unwrap();
        changes.clear();

        tree.set_value(alias, LeafValue::Float(21.5)).unwrap();
        assert_eq!(tree.value(sensor).unwrap(), LeafValue::Float(21.5));
        assert_eq!(changes.drain(), vec![(sensor, ChangeStatus::ValueChanged)]);

        tree.set_active(sensor, true).unwrap();
        assert!(tree.is_active(alias).unwrap());
        assert_eq!(tree.location(alias).unwrap(), sensor);

        let info = tree.info(alias).unwrap();
        assert!(info.is_reference());
        assert_eq!(info.reference, Some(sensor));
        assert_eq!(tree.entry(alias).unwrap().value, None);
    }

    #[test]
    fn reference_type_must_fit_the_slot() {
        let (tree, _) = fresh();
        let counter = tree.create_top_level("counter", names::INTEGER, None).unwrap();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        assert!(matches!(
            tree.add_reference(room, "temperature", counter, false),
            Err(CoreError::InvalidResourceType { .. })
        ));
        let device = tree.create_top_level("dev", "Thermostat", None).unwrap();
        tree.add_reference(room, "heater", device, false).unwrap();
    }

    #[test]
    fn children_of_a_reference_land_on_the_target() {
        let (tree, _) = fresh();
        let device = tree.create_top_level("dev", "Device", None).unwrap();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        let heater = tree.add_reference(room, "heater", device, false).unwrap();

        let on = tree.add_child(heater, "on", names::BOOLEAN, false).unwrap();
        assert_eq!(tree.info(on).unwrap().path, "dev/on");
        assert_eq!(tree.children(heater).unwrap().len(), 1);
    }

    #[test]
    fn reference_chains_are_followed() {
        let (tree, _) = fresh();
        let sensor = tree.create_top_level("sensor", names::FLOAT, None).unwrap();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        let first = tree.add_reference(room, "temperature", sensor, false).unwrap();
        let other = tree.create_top_level("other", "Room", None).unwrap();
        let second = tree.add_reference(other, "temperature", first, false).unwrap();

        assert_eq!(tree.location(second).unwrap(), sensor);
        assert_eq!(tree.info(second).unwrap().reference, Some(first));
    }

    #[test]
    fn deleting_schema_child_restores_slot() {
        let (tree, changes) = fresh();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        let temp = tree.add_child(room, "temperature", names::FLOAT, false).unwrap();
        changes.clear();

        tree.delete(temp).unwrap();
        assert!(!tree.has(temp));
        assert!(tree.optional_children(room).unwrap().contains_key("temperature"));
        assert_eq!(changes.drain(), vec![(temp, ChangeStatus::Deleted)]);

        let again = tree.add_child(room, "temperature", names::FLOAT, false).unwrap();
        assert_ne!(again, temp);
    }

    #[test]
    fn deleting_decorator_does_not_create_slot() {
        let (tree, _) = fresh();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        let extra = tree.add_child(room, "extra", names::FLOAT, true).unwrap();
        tree.delete(extra).unwrap();
        assert!(!tree.optional_children(room).unwrap().contains_key("extra"));
        assert!(tree.by_path("room/extra").is_none());
    }

    #[test]
    fn deleting_list_discards_elements() {
        let (tree, _) = fresh();
        let list = tree.create_top_level("L", names::LIST, None).unwrap();
        let elements: Vec<_> = (0..3)
            .map(|i| tree.add_child(list, &format!("e{i}"), "Device", false).unwrap())
            .collect();
        tree.delete(list).unwrap();
        for id in elements {
            assert!(!tree.has(id));
        }

        let list = tree.create_top_level("L", names::LIST, None).unwrap();
        assert!(tree.children(list).unwrap().is_empty());
        assert!(tree.by_path("L/e0").is_none());
    }

    #[test]
    fn deleting_target_removes_references() {
        let (tree, changes) = fresh();
        let sensor = tree.create_top_level("sensor", names::FLOAT, None).unwrap();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        let alias = tree.add_reference(room, "temperature", sensor, false).unwrap();
        changes.clear();

        tree.delete(sensor).unwrap();
        assert!(!tree.has(alias));
        assert!(tree.optional_children(room).unwrap().contains_key("temperature"));
        let deleted: Vec<_> = changes.drain().into_iter().map(|(id, _)| id).collect();
        assert_eq!(deleted, vec![sensor, alias]);
    }

    #[test]
    fn nonpersistent_values_are_not_tracked() {
        let (tree, changes) = fresh();
        let room = tree.create_top_level("room", "Room", None).unwrap();
        let noise = tree.add_child(room, "noise", names::FLOAT, false).unwrap();
        assert!(tree.info(noise).unwrap().flags.is_nonpersistent());
        changes.clear();

        tree.set_value(noise, LeafValue::Float(3.0)).unwrap();
        assert!(changes.is_empty());
        tree.set_active(noise, true).unwrap();
        assert_eq!(changes.drain(), vec![(noise, ChangeStatus::StatusChanged)]);
    }

    #[test]
    fn set_value_checks_type() {
        let (tree, _) = fresh();
        let x = tree.create_top_level("x", names::FLOAT, None).unwrap();
        assert!(matches!(
            tree.set_value(x, LeafValue::Int(1)),
            Err(CoreError::InvalidResourceType { .. })
        ));
        let room = tree.create_top_level("room", "Room", None).unwrap();
        assert!(tree.value(room).is_err());
    }

    #[test]
    fn strings_too_long_for_the_log_are_rejected_up_front() {
        let (tree, changes) = fresh();
        let long = "x".repeat(70_000);
        // 30k characters, but 90k bytes once encoded.
        let wide = "€".repeat(30_000);

        let text = tree.create_top_level("text", names::STRING, None).unwrap();
        changes.drain();
        for value in [
            LeafValue::String(Some(long.clone())),
            LeafValue::String(Some(wide.clone())),
            LeafValue::StringArray(vec![None, Some(long.clone())]),
        ] {
            assert!(matches!(
                tree.set_value(text, value),
                Err(CoreError::StringTooLong { .. })
            ));
        }
        assert_eq!(tree.value(text).unwrap(), LeafValue::String(Some(String::new())));
        assert!(changes.drain().is_empty());

        let limit = "x".repeat(resdb_codec::MAX_STRING_LEN);
        tree.set_value(text, LeafValue::String(Some(limit))).unwrap();

        assert!(matches!(
            tree.create_top_level(&long, "Room", None),
            Err(CoreError::StringTooLong { .. })
        ));
        assert!(matches!(
            tree.create_top_level("room", "Room", Some(&wide)),
            Err(CoreError::StringTooLong { .. })
        ));
        let room = tree.create_top_level("room", "Room", None).unwrap();
        assert!(matches!(
            tree.add_child(room, &long, names::FLOAT, true),
            Err(CoreError::StringTooLong { .. })
        ));
        assert!(matches!(
            tree.add_reference(room, &long, text, true),
            Err(CoreError::StringTooLong { .. })
        ));
        assert!(matches!(
            tree.set_owner(room, Some(&long)),
            Err(CoreError::StringTooLong { .. })
        ));
        assert_eq!(tree.info(room).unwrap().owner, None);
    }

    #[test]
    fn set_list_element_type_checks_elements() {
        let (tree, _) = fresh();
        let list = tree.create_top_level("L", names::LIST, None).unwrap();
        tree.set_list_element_type(list, "Device").unwrap();
        tree.add_child(list, "d", "Device", false).unwrap();
        assert!(tree.set_list_element_type(list, "Thermostat").is_err());
        assert!(tree.set_list_element_type(list, names::LIST).is_err());
    }

    #[test]
    fn queries() {
        let (tree, _) = fresh();
        let room = tree.create_top_level("room", "Room", Some("a")).unwrap();
        tree.add_child(room, "heater", "Thermostat", false).unwrap();
        tree.create_top_level("dev", "Device", Some("b")).unwrap();
        tree.create_top_level("roomba", names::FLOAT, Some("a")).unwrap();

        let devices: Vec<_> = tree.of_type("Device").into_iter().map(|i| i.path).collect();
        assert_eq!(devices, vec!["room/heater", "dev"]);

        let paths: Vec<_> = tree
            .filter(&ResourceFilter::new().path_prefix("room"))
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(paths, vec!["room", "room/heater"]);

        let owned = tree.filter(&ResourceFilter::new().owner("a").type_name(names::FLOAT));
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].path, "roomba");

        let top: Vec<_> = tree.all_top_level().into_iter().map(|i| i.name).collect();
        assert_eq!(top, vec!["dev", "room", "roomba"]);
        assert_eq!(tree.by_path("room/heater").unwrap().type_name, "Thermostat");
    }

    #[test]
    fn entries_rebuild_the_same_node() {
        let (tree, _) = fresh();
        let room = tree.create_top_level("room", "Room", Some("app")).unwrap();
        let temp = tree.add_child(room, "temperature", names::FLOAT, false).unwrap();
        tree.set_value(temp, LeafValue::Float(19.0)).unwrap();

        let (copy, _) = fresh();
        let child = copy.node_from_entry(&tree.entry(temp).unwrap(), 40).unwrap();
        let Link::MissingParent(child) = copy.try_link(child) else {
            panic!("child linked before its parent");
        };
        let parent = copy.node_from_entry(&tree.entry(room).unwrap(), 30).unwrap();
        assert!(matches!(copy.try_link(parent), Link::Linked));
        assert!(matches!(copy.try_link(child), Link::Linked));

        assert_eq!(copy.value(temp).unwrap(), LeafValue::Float(19.0));
        assert!(!copy.optional_children(room).unwrap().contains_key("temperature"));
        assert_eq!(copy.info(temp).unwrap().footprint, 40);
    }

    #[test]
    fn unknown_type_on_disk_is_rejected() {
        let (tree, _) = fresh();
        let x = tree.create_top_level("x", names::FLOAT, None).unwrap();
        let mut entry = tree.entry(x).unwrap();
        entry.type_name = "Gone".into();
        assert!(matches!(
            tree.node_from_entry(&entry, 0),
            Err(CoreError::UnresolvableType { .. })
        ));
    }
}
