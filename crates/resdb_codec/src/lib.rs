//! # ResDB Codec
//!
//! Binary log entry codec for the ResDB resource storage engine.
//!
//! The layout is fixed so that stores written by older deployments stay
//! readable:
//!
//! - Integers and floats are big-endian
//! - Strings are a 2-byte length plus modified UTF-8; length `0xFFFF` is `null`
//! - Arrays are an `i32` count followed by the elements
//! - Booleans are one byte
//!
//! ## Usage
//!
//! ```
//! use resdb_codec::{Encode, LeafValue, LogEntry, NodeFlags, TypeKey, NO_ID};
//!
//! let entry = LogEntry {
//!     type_name: "FloatResource".to_string(),
//!     resource_id: 1,
//!     parent_id: NO_ID,
//!     flags: NodeFlags::TOPLEVEL,
//!     type_key: TypeKey::Float,
//!     path: "x".to_string(),
//!     owner: None,
//!     ref_id: NO_ID,
//!     last_modified: 0,
//!     value: Some(LeafValue::Float(21.5)),
//! };
//! let bytes = entry.encode().unwrap();
//! let (decoded, len) = LogEntry::decode_at(&bytes, 0).unwrap();
//! assert_eq!(decoded, entry);
//! assert_eq!(len, bytes.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod error;
pub mod mutf8;
mod reader;
mod types;
mod value;
mod writer;

pub use entry::{LogEntry, LIST_TYPE_NAME, NO_ID};
pub use error::{CodecError, CodecResult};
pub use reader::DataReader;
pub use types::{NodeFlags, TypeKey};
pub use value::LeafValue;
pub use writer::{DataWriter, MAX_STRING_LEN, NULL_STRING_LEN};

/// Types that serialize into the log layout.
pub trait Encode {
    /// Writes this value to `w`.
    ///
    /// # Errors
    ///
    /// Fails if a field cannot be represented.
    fn encode_to(&self, w: &mut DataWriter) -> CodecResult<()>;

    /// Encodes this value into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Fails if a field cannot be represented.
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut w = DataWriter::with_capacity(64);
        self.encode_to(&mut w)?;
        Ok(w.into_bytes())
    }
}

/// Types that deserialize from the log layout.
pub trait Decode: Sized {
    /// Reads a value from `r`.
    ///
    /// # Errors
    ///
    /// Fails on truncated or malformed input.
    fn decode_from(r: &mut DataReader<'_>) -> CodecResult<Self>;

    /// Decodes a value that occupies exactly `bytes`.
    ///
    /// # Errors
    ///
    /// Fails on malformed input or trailing bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut r = DataReader::new(bytes);
        let value = Self::decode_from(&mut r)?;
        if !r.is_empty() {
            return Err(CodecError::invalid_structure(format!(
                "{} trailing bytes",
                r.remaining()
            )));
        }
        Ok(value)
    }
}
