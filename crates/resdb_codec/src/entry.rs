//! Log entries: one serialized node snapshot.
//!
//! ```text
//! typeName      UTF     element type for lists, "ResourceList" if unset
//! resourceId    i32
//! parentId      i32     -1 for top-level nodes
//! flags         u8      see NodeFlags
//! typeKey       u8      see TypeKey
//! path          UTF
//! ownerId       UTF     nullable
//! refId         i32     -1 unless the node is a reference
//! lastModified  i64
//! payload               leaf, non-reference nodes only
//! ```

use crate::error::{CodecError, CodecResult};
use crate::reader::DataReader;
use crate::types::{NodeFlags, TypeKey};
use crate::value::LeafValue;
use crate::writer::DataWriter;
use crate::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Id written where no node is referenced.
pub const NO_ID: i32 = -1;

/// Type name written for a list whose element type is not fixed yet.
pub const LIST_TYPE_NAME: &str = "ResourceList";

/// Fixed header bytes besides the three strings:
/// ids (4 + 4 + 4), flags and type key (1 + 1), timestamp (8).
const FIXED_HEADER_LEN: usize = 22;

/// A decoded or to-be-encoded log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Type name of the node.
    pub type_name: String,
    /// Id of the node.
    pub resource_id: i32,
    /// Id of the parent, or [`NO_ID`].
    pub parent_id: i32,
    /// Flag byte.
    pub flags: NodeFlags,
    /// Storage type.
    pub type_key: TypeKey,
    /// Full path.
    pub path: String,
    /// Owning application, if any.
    pub owner: Option<String>,
    /// Reference target, or [`NO_ID`].
    pub ref_id: i32,
    /// Last modification time in milliseconds since the epoch.
    pub last_modified: i64,
    /// Value payload; `None` for complex nodes, lists and references.
    pub value: Option<LeafValue>,
}

impl LogEntry {
    /// Last path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// True if a payload follows the header on disk.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        !self.flags.is_reference() && self.type_key.is_leaf()
    }

    /// Minimum encoded size of any entry: empty type name and path, null owner.
    #[must_use]
    pub const fn min_encoded_len() -> usize {
        FIXED_HEADER_LEN + 3 * 2
    }

    /// Decodes the entry starting at `offset` in `log` and returns it with
    /// its encoded length.
    ///
    /// # Errors
    ///
    /// Fails if the bytes at `offset` do not hold a complete entry.
    pub fn decode_at(log: &[u8], offset: usize) -> CodecResult<(Self, usize)> {
        let mut r = DataReader::at(log, offset)?;
        let entry = Self::decode_from(&mut r)?;
        Ok((entry, r.position() - offset))
    }
}

impl Encode for LogEntry {
    fn encode_to(&self, w: &mut DataWriter) -> CodecResult<()> {
        w.put_utf(Some(&self.type_name))?;
        w.put_i32(self.resource_id);
        w.put_i32(self.parent_id);
        w.put_u8(self.flags.as_byte());
        w.put_u8(self.type_key.as_byte());
        w.put_utf(Some(&self.path))?;
        w.put_utf(self.owner.as_deref())?;
        w.put_i32(self.ref_id);
        w.put_i64(self.last_modified);

        if !self.has_payload() {
            return Ok(());
        }
        match &self.value {
            Some(value) if value.type_key() == self.type_key => value.encode_to(w),
            Some(value) => Err(CodecError::invalid_structure(format!(
                "{} value on {} node {}",
                value.type_key(),
                self.type_key,
                self.path
            ))),
            None => match LeafValue::default_for(self.type_key) {
                Some(value) => value.encode_to(w),
                None => Ok(()),
            },
        }
    }
}

impl Decode for LogEntry {
    fn decode_from(r: &mut DataReader<'_>) -> CodecResult<Self> {
        let type_name = r.get_required_utf("type name")?;
        let resource_id = r.get_i32()?;
        let parent_id = r.get_i32()?;
        let flags = NodeFlags::from_byte(r.get_u8()?);
        let type_key = TypeKey::from_byte(r.get_u8()?)?;
        let path = r.get_required_utf("path")?;
        let owner = r.get_utf()?;
        let ref_id = r.get_i32()?;
        let last_modified = r.get_i64()?;

        let mut entry = Self {
            type_name,
            resource_id,
            parent_id,
            flags,
            type_key,
            path,
            owner,
            ref_id,
            last_modified,
            value: None,
        };
        if entry.has_payload() {
            entry.value = LeafValue::decode_from(type_key, r)?;
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_entry() -> LogEntry {
        LogEntry {
            type_name: "FloatResource".into(),
            resource_id: 1,
            parent_id: NO_ID,
            flags: NodeFlags::TOPLEVEL | NodeFlags::ACTIVE,
            type_key: TypeKey::Float,
            path: "x".into(),
            owner: Some("app".into()),
            ref_id: NO_ID,
            last_modified: 5,
            value: Some(LeafValue::Float(21.5)),
        }
    }

    #[test]
    fn header_layout_is_exact() {
        let bytes = float_entry().encode().unwrap();
        let mut expected = vec![0x00, 0x0D];
        expected.extend_from_slice(b"FloatResource");
        expected.extend_from_slice(&[0, 0, 0, 1]); // id
        expected.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]); // parent
        expected.push(0x18); // toplevel | active
        expected.push(1); // float
        expected.extend_from_slice(&[0x00, 0x01, b'x']);
        expected.extend_from_slice(&[0x00, 0x03, b'a', b'p', b'p']);
        expected.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]); // ref
        expected.extend_from_slice(&5i64.to_be_bytes());
        expected.extend_from_slice(&21.5f32.to_be_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn decode_reports_consumed_length() {
        let first = float_entry();
        let mut second = float_entry();
        second.resource_id = 2;
        second.path = "y".into();
        second.owner = None;

        let mut log = first.encode().unwrap();
        let split = log.len();
        log.extend(second.encode().unwrap());

        let (decoded, len) = LogEntry::decode_at(&log, 0).unwrap();
        assert_eq!(decoded, first);
        assert_eq!(len, split);

        let (decoded, len) = LogEntry::decode_at(&log, split).unwrap();
        assert_eq!(decoded, second);
        assert_eq!(split + len, log.len());
    }

    #[test]
    fn references_carry_no_payload() {
        let entry = LogEntry {
            flags: NodeFlags::REFERENCE,
            parent_id: 1,
            ref_id: 9,
            path: "room/alias".into(),
            value: Some(LeafValue::Float(1.0)),
            ..float_entry()
        };
        let bytes = entry.encode().unwrap();
        let (decoded, len) = LogEntry::decode_at(&bytes, 0).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(decoded.value, None);
        assert_eq!(decoded.ref_id, 9);
        assert_eq!(decoded.name(), "alias");
    }

    #[test]
    fn complex_entry_is_header_only() {
        let entry = LogEntry {
            type_name: "Room".into(),
            type_key: TypeKey::Complex,
            path: String::new(),
            owner: None,
            value: None,
            ..float_entry()
        };
        let bytes = entry.encode().unwrap();
        assert_eq!(bytes.len(), "Room".len() + LogEntry::min_encoded_len());
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let entry = LogEntry {
            value: Some(LeafValue::Int(1)),
            ..float_entry()
        };
        assert!(matches!(
            entry.encode(),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn missing_leaf_value_writes_default() {
        let entry = LogEntry {
            value: None,
            ..float_entry()
        };
        let bytes = entry.encode().unwrap();
        let (decoded, _) = LogEntry::decode_at(&bytes, 0).unwrap();
        assert_eq!(decoded.value, Some(LeafValue::Float(0.0)));
    }

    #[test]
    fn truncated_entry_fails() {
        let bytes = float_entry().encode().unwrap();
        let cut = &bytes[..bytes.len() - 2];
        assert!(matches!(
            LogEntry::decode_at(cut, 0),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn unknown_type_key_fails() {
        let mut bytes = float_entry().encode().unwrap();
        // type name (2 + 13) + ids (8) + flags (1)
        bytes[24] = 42;
        assert_eq!(
            LogEntry::decode_at(&bytes, 0),
            Err(CodecError::UnknownTypeKey(42))
        );
    }
}
