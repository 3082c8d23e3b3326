//! # ResDB Core
//!
//! Persistent resource-tree storage engine.
//!
//! Applications work on an in-memory tree of typed resources. Every
//! mutation is recorded as a pending change, and a background flush
//! timer appends the changed resources to a data log and rewrites a
//! directory of their offsets. On start the newest valid directory is
//! replayed to rebuild the tree.
//!
//! ```text
//! <base_path>/
//! ├─ resMap<n>    directory generations: id → offset, validated trailer
//! └─ resData<n>   data log generations: appended resource snapshots
//! ```
//!
//! This crate provides:
//! - [`ResourceDb`], the engine facade with its `init`/`start`/`stop` lifecycle
//! - [`SchemaRegistry`] and the [`TypeRegistry`] trait for resource types
//! - Crash-safe generation rotation, compaction and boot recovery
//! - [`Directory`], [`DataLog`] and [`FileGenerationSet`] for offline tools
//!
//! ## Example
//!
//! ```rust,ignore
//! use resdb_core::{names, Config, ResourceDb, SchemaRegistry};
//! use std::sync::Arc;
//!
//! let db = ResourceDb::open(Config::new(), Arc::new(SchemaRegistry::new()))?;
//! let x = db.create_top_level("x", names::FLOAT, None)?;
//! db.set_float(x, 21.5)?;
//! db.trigger_storage()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod clock;
mod compaction;
mod config;
mod database;
mod directory;
mod error;
mod files;
mod flusher;
mod log;
mod recovery;
mod registry;
mod stats;
mod store;
mod tree;
mod types;

pub use change::{ChangeStatus, ChangeTracker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compaction::{CompactionPolicy, CompactionResult};
pub use config::{Config, ENV_PREFIX, MAX_GARBAGE_RATIO, MIN_GARBAGE_RATIO};
pub use database::ResourceDb;
pub use directory::{Directory, MAGIC1, MAGIC2};
pub use error::{CoreError, CoreResult};
pub use files::{parse_generation, FileGenerationSet, KEPT_GENERATIONS};
pub use log::{DataLog, Slot, MAX_OFFSET};
pub use recovery::BootReport;
pub use registry::{names, ChildDecl, SchemaRegistry, TypeRegistry, TypeSchema};
pub use stats::{StatsSnapshot, StorageStats};
pub use tree::{NodeInfo, ResourceFilter};
pub use types::ResourceId;

pub use resdb_codec::{LeafValue, NodeFlags, TypeKey};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
