//! Engine facade.

use crate::change::ChangeTracker;
use crate::clock::{Clock, SystemClock};
use crate::compaction::CompactionResult;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::flusher::{FlushTimer, Persistence};
use crate::recovery::{self, BootReport};
use crate::registry::{ChildDecl, TypeRegistry};
use crate::stats::{StatsSnapshot, StorageStats};
use crate::tree::{NodeInfo, ResourceFilter, ResourceTree};
use crate::types::ResourceId;
use parking_lot::{Mutex, RwLock};
use resdb_codec::LeafValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Ready,
    Stopped,
}

/// The persistent resource database.
///
/// `ResourceDb` owns the in-memory resource tree and, unless persistence
/// is disabled, the store files under [`Config::base_path`] and the
/// background flush timer.
///
/// # Lifecycle
///
/// ```rust,ignore
/// use resdb_core::{Config, ResourceDb, SchemaRegistry, SystemClock};
/// use std::sync::Arc;
///
/// let db = ResourceDb::new(
///     Config::new().base_path("data"),
///     Arc::new(SchemaRegistry::new()),
///     Arc::new(SystemClock::new()),
/// );
/// db.init()?;   // load the tree from disk
/// db.start()?;  // start periodic flushing
///
/// let x = db.create_top_level("x", "FloatResource", None)?;
/// db.set_float(x, 21.5)?;
///
/// db.stop()?;   // final flush
/// ```
///
/// Changes reach disk on the next flush cycle; durability is bounded by
/// [`Config::flush_period`] unless [`ResourceDb::trigger_storage`] is
/// called.
pub struct ResourceDb {
    config: Config,
    tree: Arc<ResourceTree>,
    changes: Option<Arc<ChangeTracker>>,
    stats: Arc<StorageStats>,
    persistence: RwLock<Option<Arc<Persistence>>>,
    timer: Mutex<Option<FlushTimer>>,
    lifecycle: RwLock<Lifecycle>,
    boot_report: RwLock<Option<BootReport>>,
}

impl ResourceDb {
    /// Creates an engine; nothing is loaded until [`ResourceDb::init`].
    #[must_use]
    pub fn new(config: Config, registry: Arc<dyn TypeRegistry>, clock: Arc<dyn Clock>) -> Self {
        let changes = config
            .persistence_enabled
            .then(|| Arc::new(ChangeTracker::new()));
        let tree = Arc::new(ResourceTree::new(registry, clock, changes.clone()));
        Self {
            config,
            tree,
            changes,
            stats: Arc::new(StorageStats::new()),
            persistence: RwLock::new(None),
            timer: Mutex::new(None),
            lifecycle: RwLock::new(Lifecycle::Created),
            boot_report: RwLock::new(None),
        }
    }

    /// Creates, initializes and starts an engine with the system clock.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be loaded or the timer thread cannot be
    /// spawned.
    pub fn open(config: Config, registry: Arc<dyn TypeRegistry>) -> CoreResult<Self> {
        let db = Self::new(config, registry, Arc::new(SystemClock::new()));
        db.init()?;
        db.start()?;
        Ok(db)
    }

    /// Loads the tree from disk. Does nothing if already initialized.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors while selecting generations or opening the log,
    /// or with [`CoreError::NotReady`] after [`ResourceDb::stop`].
    pub fn init(&self) -> CoreResult<()> {
        let mut lifecycle = self.lifecycle.write();
        match *lifecycle {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::Stopped => return Err(CoreError::NotReady),
            Lifecycle::Created => {}
        }

        if let Some(changes) = &self.changes {
            let recovered = recovery::recover(&self.config, &self.tree, changes)?;
            let persistence = Persistence::new(
                self.config.clone(),
                Arc::clone(&self.tree),
                Arc::clone(changes),
                Arc::clone(&self.stats),
                recovered.files,
            );
            *self.persistence.write() = Some(Arc::new(persistence));
            *self.boot_report.write() = Some(recovered.report);
        } else {
            info!("persistence disabled, using an in-memory tree");
        }
        *lifecycle = Lifecycle::Ready;
        Ok(())
    }

    /// Starts the flush timer.
    ///
    /// # Errors
    ///
    /// Fails if not initialized or the timer thread cannot be spawned.
    pub fn start(&self) -> CoreResult<()> {
        self.ensure_ready()?;
        let Some(persistence) = self.persistence.read().clone() else {
            return Ok(());
        };
        let mut timer = self.timer.lock();
        if timer.is_none() {
            *timer = Some(FlushTimer::start(persistence, self.config.flush_period)?);
        }
        Ok(())
    }

    /// Stops the timer, flushes pending changes and closes the files.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush; the engine is stopped anyway.
    pub fn stop(&self) -> CoreResult<()> {
        if !self.enter_stopped() {
            return Ok(());
        }
        if let Some(mut timer) = self.timer.lock().take() {
            timer.stop();
        }
        // Released before the final flush.
        let persistence = self.persistence.write().take();
        match persistence {
            Some(persistence) => persistence.shutdown(),
            None => Ok(()),
        }
    }

    /// Stops without flushing; pending changes are lost.
    pub fn abort(&self) {
        if !self.enter_stopped() {
            return;
        }
        if let Some(mut timer) = self.timer.lock().take() {
            timer.stop();
        }
        let persistence = self.persistence.write().take();
        if let Some(persistence) = persistence {
            persistence.abort();
        }
    }

    fn enter_stopped(&self) -> bool {
        let mut lifecycle = self.lifecycle.write();
        let was = *lifecycle;
        *lifecycle = Lifecycle::Stopped;
        was != Lifecycle::Stopped
    }

    /// True between [`ResourceDb::init`] and [`ResourceDb::stop`].
    #[must_use]
    pub fn is_db_ready(&self) -> bool {
        *self.lifecycle.read() == Lifecycle::Ready
    }

    fn ensure_ready(&self) -> CoreResult<()> {
        if self.is_db_ready() {
            Ok(())
        } else {
            Err(CoreError::NotReady)
        }
    }

    fn persistence(&self) -> CoreResult<Arc<Persistence>> {
        self.ensure_ready()?;
        self.persistence
            .read()
            .clone()
            .ok_or(CoreError::PersistenceDisabled)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Creates a top-level resource.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or taken, or the type is unknown.
    pub fn create_top_level(
        &self,
        name: &str,
        type_name: &str,
        owner: Option<&str>,
    ) -> CoreResult<ResourceId> {
        self.ensure_ready()?;
        self.tree.create_top_level(name, type_name, owner)
    }

    /// Adds a child. Declared children must match their declared type;
    /// `decorating` adds an undeclared one.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or taken, the type is unknown or does
    /// not fit, or the parent does not exist.
    pub fn add_child(
        &self,
        parent: ResourceId,
        name: &str,
        type_name: &str,
        decorating: bool,
    ) -> CoreResult<ResourceId> {
        self.ensure_ready()?;
        self.tree.add_child(parent, name, type_name, decorating)
    }

    /// Adds a reference to `target` as child `name` of `parent`.
    ///
    /// # Errors
    ///
    /// As [`ResourceDb::add_child`], plus [`CoreError::ReferenceLoop`].
    pub fn add_reference(
        &self,
        parent: ResourceId,
        name: &str,
        target: ResourceId,
        decorating: bool,
    ) -> CoreResult<ResourceId> {
        self.ensure_ready()?;
        self.tree.add_reference(parent, name, target, decorating)
    }

    /// Deletes a resource, its subtree and every reference into them.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn delete(&self, id: ResourceId) -> CoreResult<()> {
        self.ensure_ready()?;
        self.tree.delete(id)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Snapshot of a resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn resource(&self, id: ResourceId) -> CoreResult<NodeInfo> {
        self.ensure_ready()?;
        self.tree
            .info(id)
            .ok_or_else(|| CoreError::not_found(id.to_string()))
    }

    /// True if the resource exists.
    ///
    /// # Errors
    ///
    /// Fails if the engine is not ready.
    pub fn has_resource(&self, id: ResourceId) -> CoreResult<bool> {
        self.ensure_ready()?;
        Ok(self.tree.has(id))
    }

    /// Resource at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the engine is not ready.
    pub fn resource_by_path(&self, path: &str) -> CoreResult<Option<NodeInfo>> {
        self.ensure_ready()?;
        Ok(self.tree.by_path(path))
    }

    /// Top-level resource `name`.
    ///
    /// # Errors
    ///
    /// Fails if the engine is not ready.
    pub fn top_level(&self, name: &str) -> CoreResult<Option<NodeInfo>> {
        self.ensure_ready()?;
        Ok(self.tree.top_level(name))
    }

    /// All top-level resources, by name.
    ///
    /// # Errors
    ///
    /// Fails if the engine is not ready.
    pub fn all_top_level(&self) -> CoreResult<Vec<NodeInfo>> {
        self.ensure_ready()?;
        Ok(self.tree.all_top_level())
    }

    /// Live children, following references.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn children(&self, id: ResourceId) -> CoreResult<Vec<NodeInfo>> {
        self.ensure_ready()?;
        self.tree.children(id)
    }

    /// Live child `name`, following references.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn child(&self, id: ResourceId, name: &str) -> CoreResult<Option<NodeInfo>> {
        self.ensure_ready()?;
        self.tree.child(id, name)
    }

    /// Declared children that are not instantiated.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn optional_children(&self, id: ResourceId) -> CoreResult<BTreeMap<String, ChildDecl>> {
        self.ensure_ready()?;
        self.tree.optional_children(id)
    }

    /// End of the reference chain starting at `id`.
    ///
    /// # Errors
    ///
    /// Fails if a resource on the chain does not exist.
    pub fn location(&self, id: ResourceId) -> CoreResult<ResourceId> {
        self.ensure_ready()?;
        self.tree.location(id)
    }

    /// Non-reference resources assignable to `type_name`, by id.
    ///
    /// # Errors
    ///
    /// Fails if the engine is not ready.
    pub fn resources_of_type(&self, type_name: &str) -> CoreResult<Vec<NodeInfo>> {
        self.ensure_ready()?;
        Ok(self.tree.of_type(type_name))
    }

    /// Resources matching every set criterion of `filter`, by path.
    ///
    /// # Errors
    ///
    /// Fails if the engine is not ready.
    pub fn filter(&self, filter: &ResourceFilter) -> CoreResult<Vec<NodeInfo>> {
        self.ensure_ready()?;
        Ok(self.tree.filter(filter))
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Value of a leaf resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or holds no value.
    pub fn value(&self, id: ResourceId) -> CoreResult<LeafValue> {
        self.ensure_ready()?;
        self.tree.value(id)
    }

    /// Replaces the value of a leaf resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or has another type.
    pub fn set_value(&self, id: ResourceId, value: LeafValue) -> CoreResult<()> {
        self.ensure_ready()?;
        self.tree.set_value(id, value)
    }

    /// Value of a float resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a float.
    pub fn float(&self, id: ResourceId) -> CoreResult<f32> {
        match self.value(id)? {
            LeafValue::Float(v) => Ok(v),
            other => Err(mismatch(id, "float", &other)),
        }
    }

    /// Sets a float resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a float.
    pub fn set_float(&self, id: ResourceId, value: f32) -> CoreResult<()> {
        self.set_value(id, LeafValue::Float(value))
    }

    /// Value of an integer resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not an integer.
    pub fn int(&self, id: ResourceId) -> CoreResult<i32> {
        match self.value(id)? {
            LeafValue::Int(v) => Ok(v),
            other => Err(mismatch(id, "int", &other)),
        }
    }

    /// Sets an integer resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not an integer.
    pub fn set_int(&self, id: ResourceId, value: i32) -> CoreResult<()> {
        self.set_value(id, LeafValue::Int(value))
    }

    /// Value of a long resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a long.
    pub fn long(&self, id: ResourceId) -> CoreResult<i64> {
        match self.value(id)? {
            LeafValue::Long(v) => Ok(v),
            other => Err(mismatch(id, "long", &other)),
        }
    }

    /// Sets a long resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a long.
    pub fn set_long(&self, id: ResourceId, value: i64) -> CoreResult<()> {
        self.set_value(id, LeafValue::Long(value))
    }

    /// Value of a boolean resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a boolean.
    pub fn bool(&self, id: ResourceId) -> CoreResult<bool> {
        match self.value(id)? {
            LeafValue::Bool(v) => Ok(v),
            other => Err(mismatch(id, "bool", &other)),
        }
    }

    /// Sets a boolean resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a boolean.
    pub fn set_bool(&self, id: ResourceId, value: bool) -> CoreResult<()> {
        self.set_value(id, LeafValue::Bool(value))
    }

    /// Value of a string resource; `None` for a null string.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a string.
    pub fn string(&self, id: ResourceId) -> CoreResult<Option<String>> {
        match self.value(id)? {
            LeafValue::String(v) => Ok(v),
            other => Err(mismatch(id, "string", &other)),
        }
    }

    /// Sets a string resource.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a string.
    pub fn set_string(&self, id: ResourceId, value: Option<&str>) -> CoreResult<()> {
        self.set_value(id, LeafValue::String(value.map(str::to_string)))
    }

    /// Active flag, following references.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn is_active(&self, id: ResourceId) -> CoreResult<bool> {
        self.ensure_ready()?;
        self.tree.is_active(id)
    }

    /// Sets the active flag, following references.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn set_active(&self, id: ResourceId, active: bool) -> CoreResult<()> {
        self.ensure_ready()?;
        self.tree.set_active(id, active)
    }

    /// Sets the owning application of the resource itself.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn set_owner(&self, id: ResourceId, owner: Option<&str>) -> CoreResult<()> {
        self.ensure_ready()?;
        self.tree.set_owner(id, owner)
    }

    /// Overrides the modification time, following references.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist.
    pub fn set_last_modified(&self, id: ResourceId, millis: i64) -> CoreResult<()> {
        self.ensure_ready()?;
        self.tree.set_last_modified(id, millis)
    }

    /// Element type of a list, `None` while unset.
    ///
    /// # Errors
    ///
    /// Fails if the resource does not exist or is not a list.
    pub fn list_element_type(&self, id: ResourceId) -> CoreResult<Option<String>> {
        self.ensure_ready()?;
        self.tree.list_element_type(id)
    }

    /// Fixes the element type of a list.
    ///
    /// # Errors
    ///
    /// Fails if the resource is not a list, the type is unknown, or an
    /// existing element does not fit.
    pub fn set_list_element_type(&self, id: ResourceId, element_type: &str) -> CoreResult<()> {
        self.ensure_ready()?;
        self.tree.set_list_element_type(id, element_type)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Suppresses timer flush cycles until [`ResourceDb::finish_transaction`].
    pub fn start_transaction(&self) {
        if let Some(persistence) = self.persistence.read().as_ref() {
            persistence.start_transaction();
        }
    }

    /// Re-enables timer flush cycles.
    pub fn finish_transaction(&self) {
        if let Some(persistence) = self.persistence.read().as_ref() {
            persistence.finish_transaction();
        }
    }

    /// True while a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.persistence
            .read()
            .as_ref()
            .is_some_and(|p| p.in_transaction())
    }

    /// Runs one flush cycle now, regardless of transactions.
    ///
    /// Returns whether anything was written; always `false` with
    /// persistence disabled.
    ///
    /// # Errors
    ///
    /// Fails if the engine is not ready or the cycle fails; failed changes
    /// are retried by the next cycle.
    pub fn trigger_storage(&self) -> CoreResult<bool> {
        match self.persistence() {
            Ok(persistence) => persistence.trigger_storage(),
            Err(CoreError::PersistenceDisabled) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Rewrites the log from the live tree, regardless of garbage.
    ///
    /// # Errors
    ///
    /// Fails if persistence is disabled or on I/O errors.
    pub fn compact(&self) -> CoreResult<CompactionResult> {
        self.persistence()?.compact()
    }

    /// Storage counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// What boot found, once initialized with persistence.
    #[must_use]
    pub fn boot_report(&self) -> Option<BootReport> {
        self.boot_report.read().clone()
    }

    /// Paths of resources discarded at boot.
    #[must_use]
    pub fn unreachable_paths(&self) -> Vec<String> {
        self.boot_report
            .read()
            .as_ref()
            .map(|report| report.discarded.clone())
            .unwrap_or_default()
    }
}

fn mismatch(id: ResourceId, wanted: &str, found: &LeafValue) -> CoreError {
    CoreError::invalid_type(format!("{id} holds {}, not {wanted}", found.type_key()))
}

impl std::fmt::Debug for ResourceDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDb")
            .field("base_path", &self.config.base_path)
            .field("ready", &self.is_db_ready())
            .field("resources", &self.tree.len())
            .finish_non_exhaustive()
    }
}

impl Drop for ResourceDb {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "final flush failed");
        }
    }
}
