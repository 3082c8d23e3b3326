//! Leaf values carried by primitive resources.

use crate::error::CodecResult;
use crate::reader::DataReader;
use crate::types::TypeKey;
use crate::writer::DataWriter;
use serde::{Deserialize, Serialize};

/// The typed payload of a leaf node.
///
/// String scalars and string array elements are nullable, matching the
/// `-1` length sentinel on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LeafValue {
    /// Boolean value.
    Bool(bool),
    /// Float value.
    Float(f32),
    /// Int value.
    Int(i32),
    /// Long value.
    Long(i64),
    /// String value.
    String(Option<String>),
    /// Boolean array.
    BoolArray(Vec<bool>),
    /// Float array.
    FloatArray(Vec<f32>),
    /// Int array.
    IntArray(Vec<i32>),
    /// Long array.
    LongArray(Vec<i64>),
    /// String array.
    StringArray(Vec<Option<String>>),
    /// Opaque bytes.
    Opaque(Vec<u8>),
}

impl LeafValue {
    /// Returns the type key this value belongs to.
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        match self {
            Self::Bool(_) => TypeKey::Boolean,
            Self::Float(_) => TypeKey::Float,
            Self::Int(_) => TypeKey::Int,
            Self::Long(_) => TypeKey::Long,
            Self::String(_) => TypeKey::String,
            Self::BoolArray(_) => TypeKey::BooleanArray,
            Self::FloatArray(_) => TypeKey::FloatArray,
            Self::IntArray(_) => TypeKey::IntArray,
            Self::LongArray(_) => TypeKey::LongArray,
            Self::StringArray(_) => TypeKey::StringArray,
            Self::Opaque(_) => TypeKey::Opaque,
        }
    }

    /// Value a freshly created leaf of `key` starts with, or `None` for
    /// complex and list types.
    #[must_use]
    pub fn default_for(key: TypeKey) -> Option<Self> {
        Some(match key {
            TypeKey::Boolean => Self::Bool(false),
            TypeKey::Float => Self::Float(0.0),
            TypeKey::Int => Self::Int(0),
            TypeKey::Long => Self::Long(0),
            TypeKey::String => Self::String(Some(String::new())),
            TypeKey::BooleanArray => Self::BoolArray(Vec::new()),
            TypeKey::FloatArray => Self::FloatArray(Vec::new()),
            TypeKey::IntArray => Self::IntArray(Vec::new()),
            TypeKey::LongArray => Self::LongArray(Vec::new()),
            TypeKey::StringArray => Self::StringArray(Vec::new()),
            TypeKey::Opaque => Self::Opaque(Vec::new()),
            TypeKey::List | TypeKey::Complex => return None,
        })
    }

    /// Writes the payload in the log layout.
    ///
    /// # Errors
    ///
    /// Fails on strings that are too long or arrays longer than `i32::MAX`.
    pub fn encode_to(&self, w: &mut DataWriter) -> CodecResult<()> {
        match self {
            Self::Bool(v) => w.put_bool(*v),
            Self::Float(v) => w.put_f32(*v),
            Self::Int(v) => w.put_i32(*v),
            Self::Long(v) => w.put_i64(*v),
            Self::String(v) => w.put_utf(v.as_deref())?,
            Self::BoolArray(values) => {
                w.put_count(values.len())?;
                values.iter().for_each(|v| w.put_bool(*v));
            }
            Self::FloatArray(values) => {
                w.put_count(values.len())?;
                values.iter().for_each(|v| w.put_f32(*v));
            }
            Self::IntArray(values) => {
                w.put_count(values.len())?;
                values.iter().for_each(|v| w.put_i32(*v));
            }
            Self::LongArray(values) => {
                w.put_count(values.len())?;
                values.iter().for_each(|v| w.put_i64(*v));
            }
            Self::StringArray(values) => {
                w.put_count(values.len())?;
                for v in values {
                    w.put_utf(v.as_deref())?;
                }
            }
            Self::Opaque(bytes) => {
                w.put_count(bytes.len())?;
                w.put_slice(bytes);
            }
        }
        Ok(())
    }

    /// Reads a payload of type `key`; returns `None` for complex and list
    /// types, which have no payload.
    ///
    /// # Errors
    ///
    /// Fails on truncated input, negative counts or malformed strings.
    pub fn decode_from(key: TypeKey, r: &mut DataReader<'_>) -> CodecResult<Option<Self>> {
        let value = match key {
            TypeKey::Boolean => Self::Bool(r.get_bool()?),
            TypeKey::Float => Self::Float(r.get_f32()?),
            TypeKey::Int => Self::Int(r.get_i32()?),
            TypeKey::Long => Self::Long(r.get_i64()?),
            TypeKey::String => Self::String(r.get_utf()?),
            TypeKey::BooleanArray => Self::BoolArray(read_array(r, DataReader::get_bool)?),
            TypeKey::FloatArray => Self::FloatArray(read_array(r, DataReader::get_f32)?),
            TypeKey::IntArray => Self::IntArray(read_array(r, DataReader::get_i32)?),
            TypeKey::LongArray => Self::LongArray(read_array(r, DataReader::get_i64)?),
            TypeKey::StringArray => Self::StringArray(read_array(r, DataReader::get_utf)?),
            TypeKey::Opaque => {
                let count = r.get_count()?;
                Self::Opaque(r.get_bytes(count)?)
            }
            TypeKey::List | TypeKey::Complex => return Ok(None),
        };
        Ok(Some(value))
    }
}

fn read_array<'a, T>(
    r: &mut DataReader<'a>,
    mut read: impl FnMut(&mut DataReader<'a>) -> CodecResult<T>,
) -> CodecResult<Vec<T>> {
    let count = r.get_count()?;
    // A corrupt count must not trigger a huge allocation up front.
    let mut values = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        values.push(read(r)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CodecError;

    fn encode(value: &LeafValue) -> Vec<u8> {
        let mut w = DataWriter::new();
        value.encode_to(&mut w).unwrap();
        w.into_bytes()
    }

    #[test]
    fn scalar_layouts() {
        assert_eq!(encode(&LeafValue::Bool(true)), vec![1]);
        assert_eq!(encode(&LeafValue::Int(258)), vec![0, 0, 1, 2]);
        assert_eq!(encode(&LeafValue::Float(21.5)), 21.5f32.to_be_bytes().to_vec());
        assert_eq!(encode(&LeafValue::String(None)), vec![0xFF, 0xFF]);
    }

    #[test]
    fn arrays_are_count_prefixed() {
        assert_eq!(
            encode(&LeafValue::IntArray(vec![1, -1])),
            vec![0, 0, 0, 2, 0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            encode(&LeafValue::StringArray(vec![Some("a".into()), None])),
            vec![0, 0, 0, 2, 0, 1, b'a', 0xFF, 0xFF]
        );
        assert_eq!(
            encode(&LeafValue::Opaque(vec![7, 8])),
            vec![0, 0, 0, 2, 7, 8]
        );
    }

    #[test]
    fn decode_reads_back_array_of_longs() {
        let value = LeafValue::LongArray(vec![i64::MIN, 0, i64::MAX]);
        let bytes = encode(&value);
        let mut r = DataReader::new(&bytes);
        assert_eq!(
            LeafValue::decode_from(TypeKey::LongArray, &mut r).unwrap(),
            Some(value)
        );
        assert!(r.is_empty());
    }

    #[test]
    fn complex_types_have_no_payload() {
        let mut r = DataReader::new(&[]);
        assert_eq!(LeafValue::decode_from(TypeKey::Complex, &mut r).unwrap(), None);
        assert_eq!(LeafValue::decode_from(TypeKey::List, &mut r).unwrap(), None);
        assert_eq!(LeafValue::default_for(TypeKey::List), None);
    }

    #[test]
    fn huge_count_fails_without_allocating() {
        let bytes = i32::MAX.to_be_bytes();
        let mut r = DataReader::new(&bytes);
        assert!(matches!(
            LeafValue::decode_from(TypeKey::IntArray, &mut r),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn defaults_match_their_key() {
        for b in 0..=12 {
            let key = TypeKey::from_byte(b).unwrap();
            if let Some(value) = LeafValue::default_for(key) {
                assert_eq!(value.type_key(), key);
            }
        }
    }
}
