//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding log entries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended in the middle of a field.
    #[error("unexpected end of input at byte {pos}: needed {needed} more")]
    UnexpectedEof {
        /// Position where the read started.
        pos: usize,
        /// Bytes that were missing.
        needed: usize,
    },

    /// A string is not valid modified UTF-8.
    #[error("invalid modified UTF-8 at byte {pos}")]
    InvalidUtf8 {
        /// Position of the offending string.
        pos: usize,
    },

    /// A string is too long for its 2-byte length prefix.
    #[error("string of {len} encoded bytes exceeds 65534")]
    StringTooLong {
        /// Encoded length of the string.
        len: usize,
    },

    /// A type key byte has no meaning.
    #[error("unknown type key {0}")]
    UnknownTypeKey(u8),

    /// An array or byte count is negative.
    #[error("negative element count {0}")]
    NegativeCount(i32),

    /// Structurally invalid entry.
    #[error("invalid entry structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
