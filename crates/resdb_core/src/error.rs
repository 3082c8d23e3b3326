//! Error types for the storage engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] resdb_storage::StorageError),

    /// Log entry codec error.
    #[error("codec error: {0}")]
    Codec(#[from] resdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A directory file failed trailer or data-file validation.
    #[error("malformed directory: {message}")]
    MalformedDirectory {
        /// What failed.
        message: String,
    },

    /// The type registry does not know a type.
    #[error("type cannot be resolved: {type_name}")]
    UnresolvableType {
        /// The unknown type name.
        type_name: String,
    },

    /// A resource with this path already exists.
    #[error("resource already exists: {path}")]
    ResourceAlreadyExists {
        /// Path of the existing resource.
        path: String,
    },

    /// A resource or schema slot does not exist.
    #[error("resource not found: {what}")]
    ResourceNotFound {
        /// Id, path or slot that was looked up.
        what: String,
    },

    /// A type does not fit where it was used.
    #[error("invalid resource type: {message}")]
    InvalidResourceType {
        /// Description of the mismatch.
        message: String,
    },

    /// Creating the reference would close a reference cycle.
    #[error("reference loop through {path}")]
    ReferenceLoop {
        /// Path where the loop was detected.
        path: String,
    },

    /// A resource name is empty or contains a path separator.
    #[error("invalid resource name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A string is too long for the log format.
    #[error("{what} is {len} bytes encoded, over the {max}-byte limit")]
    StringTooLong {
        /// Which string: a path, an owner or a value.
        what: String,
        /// Its modified UTF-8 length.
        len: usize,
        /// The limit.
        max: usize,
    },

    /// A log offset does not fit the 32-bit directory format.
    #[error("log offset {offset} exceeds the directory format")]
    OffsetOverflow {
        /// The offending offset.
        offset: u64,
    },

    /// The engine is not initialized or already stopped.
    #[error("resource database is not ready")]
    NotReady,

    /// The operation needs persistence, which is disabled.
    #[error("persistence is disabled")]
    PersistenceDisabled,
}

impl CoreError {
    /// Creates a malformed directory error.
    pub fn malformed_directory(message: impl Into<String>) -> Self {
        Self::MalformedDirectory {
            message: message.into(),
        }
    }

    /// Creates an unresolvable type error.
    pub fn unresolvable_type(type_name: impl Into<String>) -> Self {
        Self::UnresolvableType {
            type_name: type_name.into(),
        }
    }

    /// Creates a resource already exists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::ResourceAlreadyExists { path: path.into() }
    }

    /// Creates a string too long error.
    pub fn string_too_long(what: impl Into<String>, len: usize) -> Self {
        Self::StringTooLong {
            what: what.into(),
            len,
            max: resdb_codec::MAX_STRING_LEN,
        }
    }

    /// Creates a resource not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::ResourceNotFound { what: what.into() }
    }

    /// Creates an invalid resource type error.
    pub fn invalid_type(message: impl Into<String>) -> Self {
        Self::InvalidResourceType {
            message: message.into(),
        }
    }

    /// Creates a reference loop error.
    pub fn reference_loop(path: impl Into<String>) -> Self {
        Self::ReferenceLoop { path: path.into() }
    }

    /// Creates an invalid name error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    /// True for read/write faults, which are retried rather than reported
    /// as contract violations.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Storage(_))
    }
}
