//! # ResDB Storage
//!
//! Byte-store backends for the ResDB resource storage engine.
//!
//! Backends are **opaque byte stores**: they hold the bytes of one physical
//! file generation (a data log or a directory file) and never interpret them.
//!
//! ## Design Principles
//!
//! - Backends only read, append, flush and sync
//! - No knowledge of log entries, directory trailers or generations
//! - Must be `Send + Sync` so the flusher thread can own them
//! - `flush` pushes buffered appends to the OS, `sync` makes them durable
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - Buffered appends on top of an OS file
//! - [`InMemoryBackend`] - Shareable in-memory buffer for tests
//! - [`FaultyBackend`] - Wrapper that injects I/O failures on demand
//!
//! ## Example
//!
//! ```rust
//! use resdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"resData").unwrap();
//! backend.flush().unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"resData");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod faulty;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use faulty::{FaultSwitch, FaultyBackend};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
