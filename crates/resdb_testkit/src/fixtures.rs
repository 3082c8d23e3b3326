//! Test fixtures and store helpers.
//!
//! Provides a sample type registry and temporary stores that can be
//! restarted in place.

use resdb_core::{
    names, ChildDecl, Config, ManualClock, ResourceDb, SchemaRegistry, TypeSchema,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Sensor type: a float reading with unit and calibration table.
pub const TEMPERATURE_SENSOR: &str = "TemperatureSensor";
/// Room type: temperature, name, a list of sensors and a nonpersistent
/// noise level.
pub const ROOM: &str = "Room";
/// Device type: on/off switch and power reading.
pub const DEVICE: &str = "Device";
/// Thermostat type: a device with a target temperature and a sensor slot.
pub const THERMOSTAT: &str = "Thermostat";

/// Start time of the manual clock, in milliseconds.
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// Registry with the sample types registered.
pub fn sample_registry() -> Arc<SchemaRegistry> {
    let registry = SchemaRegistry::new();
    registry
        .register(
            TypeSchema::complex(TEMPERATURE_SENSOR)
                .child("reading", ChildDecl::new(names::FLOAT))
                .child("unit", ChildDecl::new(names::STRING))
                .child("calibration", ChildDecl::new(names::FLOAT_ARRAY)),
        )
        .expect("Failed to register sensor type");
    registry
        .register(
            TypeSchema::complex(ROOM)
                .child("temperature", ChildDecl::new(names::FLOAT))
                .child("name", ChildDecl::new(names::STRING))
                .child("sensors", ChildDecl::list_of(TEMPERATURE_SENSOR))
                .child("noise", ChildDecl::new(names::FLOAT).nonpersistent()),
        )
        .expect("Failed to register room type");
    registry
        .register(
            TypeSchema::complex(DEVICE)
                .child("on", ChildDecl::new(names::BOOLEAN))
                .child("power", ChildDecl::new(names::FLOAT)),
        )
        .expect("Failed to register device type");
    registry
        .register(
            TypeSchema::complex(THERMOSTAT)
                .extends(DEVICE)
                .child("target", ChildDecl::new(names::FLOAT))
                .child("sensor", ChildDecl::new(TEMPERATURE_SENSOR)),
        )
        .expect("Failed to register thermostat type");
    Arc::new(registry)
}

/// A store in a temporary directory with automatic cleanup.
///
/// The engine is initialized but the flush timer is not started, so
/// tests decide when cycles run via `trigger_storage`.
pub struct TestStore {
    /// The engine instance.
    pub db: ResourceDb,
    /// Clock shared by every incarnation of the engine.
    pub clock: Arc<ManualClock>,
    registry: Arc<SchemaRegistry>,
    config: Config,
    temp_dir: TempDir,
}

impl TestStore {
    /// Creates an empty store with the sample registry.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates an empty store, adjusting the default configuration.
    pub fn with_config(adjust: impl FnOnce(Config) -> Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = adjust(Config::new()).base_path(temp_dir.path());
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let registry = sample_registry();
        let db = Self::boot(&config, &registry, &clock);
        Self {
            db,
            clock,
            registry,
            config,
            temp_dir,
        }
    }

    fn boot(config: &Config, registry: &Arc<SchemaRegistry>, clock: &Arc<ManualClock>) -> ResourceDb {
        let db = ResourceDb::new(config.clone(), registry.clone(), clock.clone());
        db.init().expect("Failed to initialize store");
        db
    }

    /// Store directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Configuration the engine runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry the engine resolves types with.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Stops the engine with a final flush and boots a new one on the same
    /// files.
    pub fn reopen(&mut self) {
        self.db.stop().expect("Failed to stop store");
        self.db = Self::boot(&self.config, &self.registry, &self.clock);
    }

    /// Stops the engine without flushing, like a killed process, and boots
    /// a new one.
    pub fn crash_and_reopen(&mut self) {
        self.db.abort();
        self.db = Self::boot(&self.config, &self.registry, &self.clock);
    }

    /// Stops the engine and boots a new one resolving types with
    /// `registry`.
    pub fn reopen_with_registry(&mut self, registry: Arc<SchemaRegistry>) {
        self.db.stop().expect("Failed to stop store");
        self.registry = registry;
        self.db = Self::boot(&self.config, &self.registry, &self.clock);
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = ResourceDb;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary store.
///
/// # Example
///
/// ```rust,ignore
/// use resdb_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         store.create_top_level("x", names::FLOAT, None).unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F>(f: F)
where
    F: FnOnce(&mut TestStore),
{
    let mut store = TestStore::new();
    f(&mut store);
}
