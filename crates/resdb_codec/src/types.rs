//! Type keys and node flag bits as they appear on disk.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage type of a node, written as one byte in every log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeKey {
    /// Boolean leaf.
    Boolean = 0,
    /// 32-bit float leaf.
    Float = 1,
    /// 32-bit integer leaf.
    Int = 2,
    /// 64-bit integer leaf (timestamps and durations).
    Long = 3,
    /// String leaf.
    String = 4,
    /// Boolean array leaf.
    BooleanArray = 5,
    /// Float array leaf.
    FloatArray = 6,
    /// Int array leaf.
    IntArray = 7,
    /// Long array leaf.
    LongArray = 8,
    /// String array leaf.
    StringArray = 9,
    /// Complex array ("list") of child resources.
    List = 10,
    /// Complex resource with named children.
    Complex = 11,
    /// Opaque byte array leaf.
    Opaque = 12,
}

impl TypeKey {
    /// Parses a type key byte.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownTypeKey`] for bytes outside `0..=12`.
    pub fn from_byte(b: u8) -> CodecResult<Self> {
        Ok(match b {
            0 => Self::Boolean,
            1 => Self::Float,
            2 => Self::Int,
            3 => Self::Long,
            4 => Self::String,
            5 => Self::BooleanArray,
            6 => Self::FloatArray,
            7 => Self::IntArray,
            8 => Self::LongArray,
            9 => Self::StringArray,
            10 => Self::List,
            11 => Self::Complex,
            12 => Self::Opaque,
            other => return Err(CodecError::UnknownTypeKey(other)),
        })
    }

    /// Returns the byte written to disk.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// True for types that carry a value payload.
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        !matches!(self, Self::List | Self::Complex)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Float => "float",
            Self::Int => "int",
            Self::Long => "long",
            Self::String => "string",
            Self::BooleanArray => "boolean[]",
            Self::FloatArray => "float[]",
            Self::IntArray => "int[]",
            Self::LongArray => "long[]",
            Self::StringArray => "string[]",
            Self::List => "list",
            Self::Complex => "complex",
            Self::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

/// Node flag byte.
///
/// Unknown bits read from disk are preserved when the entry is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Value changes are not persisted.
    pub const NONPERSISTENT: Self = Self(0x02);
    /// Node is a complex array ("list").
    pub const LIST: Self = Self(0x04);
    /// Node is active.
    pub const ACTIVE: Self = Self(0x08);
    /// Node has no parent.
    pub const TOPLEVEL: Self = Self(0x10);
    /// Node was added outside its parent's declared schema.
    pub const DECORATOR: Self = Self(0x20);
    /// Node aliases another node.
    pub const REFERENCE: Self = Self(0x40);

    /// Creates flags from the raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with `other` set or cleared.
    #[must_use]
    pub const fn with(self, other: Self, on: bool) -> Self {
        if on {
            Self(self.0 | other.0)
        } else {
            Self(self.0 & !other.0)
        }
    }

    /// Sets or clears `other` in place.
    pub fn set(&mut self, other: Self, on: bool) {
        *self = self.with(other, on);
    }

    /// Checks the nonpersistent flag.
    #[must_use]
    pub const fn is_nonpersistent(self) -> bool {
        self.contains(Self::NONPERSISTENT)
    }

    /// Checks the list flag.
    #[must_use]
    pub const fn is_list(self) -> bool {
        self.contains(Self::LIST)
    }

    /// Checks the active flag.
    #[must_use]
    pub const fn is_active(self) -> bool {
        self.contains(Self::ACTIVE)
    }

    /// Checks the toplevel flag.
    #[must_use]
    pub const fn is_toplevel(self) -> bool {
        self.contains(Self::TOPLEVEL)
    }

    /// Checks the decorator flag.
    #[must_use]
    pub const fn is_decorator(self) -> bool {
        self.contains(Self::DECORATOR)
    }

    /// Checks the reference flag.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        self.contains(Self::REFERENCE)
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_key_bytes_are_stable() {
        assert_eq!(TypeKey::Boolean.as_byte(), 0);
        assert_eq!(TypeKey::StringArray.as_byte(), 9);
        assert_eq!(TypeKey::List.as_byte(), 10);
        assert_eq!(TypeKey::Complex.as_byte(), 11);
        assert_eq!(TypeKey::Opaque.as_byte(), 12);
        for b in 0..=12 {
            assert_eq!(TypeKey::from_byte(b).unwrap().as_byte(), b);
        }
    }

    #[test]
    fn unknown_type_key_is_rejected() {
        assert_eq!(TypeKey::from_byte(13), Err(CodecError::UnknownTypeKey(13)));
        assert_eq!(TypeKey::from_byte(0xFF), Err(CodecError::UnknownTypeKey(0xFF)));
    }

    #[test]
    fn only_list_and_complex_are_not_leaves() {
        assert!(!TypeKey::List.is_leaf());
        assert!(!TypeKey::Complex.is_leaf());
        assert!(TypeKey::Opaque.is_leaf());
        assert!(TypeKey::Float.is_leaf());
    }

    #[test]
    fn flag_bits() {
        let flags = NodeFlags::TOPLEVEL | NodeFlags::ACTIVE;
        assert_eq!(flags.as_byte(), 0x18);
        assert!(flags.is_toplevel());
        assert!(flags.is_active());
        assert!(!flags.is_reference());

        let cleared = flags.with(NodeFlags::ACTIVE, false);
        assert_eq!(cleared, NodeFlags::TOPLEVEL);
    }

    #[test]
    fn unknown_bits_survive() {
        let mut flags = NodeFlags::from_byte(0x81);
        flags.set(NodeFlags::DECORATOR, true);
        assert_eq!(flags.as_byte(), 0xA1);
    }
}
