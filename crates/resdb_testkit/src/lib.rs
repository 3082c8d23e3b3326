//! # ResDB Testkit
//!
//! Test utilities for ResDB.
//!
//! This crate provides:
//! - Temporary stores with a sample type registry and a manual clock
//! - File corruption helpers for crash and torn-write scenarios
//! - Property-based generators for names and leaf values
//! - Cross-crate integration tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use resdb_testkit::prelude::*;
//!
//! #[test]
//! fn survives_restart() {
//!     let mut store = TestStore::new();
//!     let x = store.create_top_level("x", names::FLOAT, None).unwrap();
//!     store.set_float(x, 21.5).unwrap();
//!     store.reopen();
//!     assert_eq!(store.float(x).unwrap(), 21.5);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use resdb_core::names;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
