//! Big-endian data writer.

use crate::error::{CodecError, CodecResult};
use crate::mutf8;
use bytes::{BufMut, BytesMut};

/// Length prefix marking a `null` string.
pub const NULL_STRING_LEN: i16 = -1;

/// Longest encodable string; `0xFFFF` is taken by the null sentinel.
pub const MAX_STRING_LEN: usize = 0xFFFE;

/// Writes primitives in the `DataOutput` layout: big-endian numbers and
/// length-prefixed modified UTF-8 strings.
#[derive(Debug, Default)]
pub struct DataWriter {
    buffer: BytesMut,
}

impl DataWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the written bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer and returns the written bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Writes a boolean as one byte.
    pub fn put_bool(&mut self, v: bool) {
        self.buffer.put_u8(u8::from(v));
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buffer.put_u8(v);
    }

    /// Writes a big-endian `i32`.
    pub fn put_i32(&mut self, v: i32) {
        self.buffer.put_i32(v);
    }

    /// Writes a big-endian `i64`.
    pub fn put_i64(&mut self, v: i64) {
        self.buffer.put_i64(v);
    }

    /// Writes a big-endian IEEE 754 `f32`.
    pub fn put_f32(&mut self, v: f32) {
        self.buffer.put_f32(v);
    }

    /// Writes raw bytes without a prefix.
    pub fn put_slice(&mut self, v: &[u8]) {
        self.buffer.put_slice(v);
    }

    /// Writes an element count.
    ///
    /// # Errors
    ///
    /// Fails if `count` does not fit an `i32`.
    pub fn put_count(&mut self, count: usize) -> CodecResult<()> {
        let count = i32::try_from(count)
            .map_err(|_| CodecError::invalid_structure(format!("{count} elements")))?;
        self.buffer.put_i32(count);
        Ok(())
    }

    /// Writes a nullable string; `None` becomes the `-1` length sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::StringTooLong`] if the encoded string exceeds
    /// [`MAX_STRING_LEN`] bytes.
    pub fn put_utf(&mut self, v: Option<&str>) -> CodecResult<()> {
        let Some(s) = v else {
            self.buffer.put_i16(NULL_STRING_LEN);
            return Ok(());
        };
        let len = mutf8::encoded_len(s);
        if len > MAX_STRING_LEN {
            return Err(CodecError::StringTooLong { len });
        }
        self.buffer.put_u16(len as u16);
        let mut encoded = Vec::with_capacity(len);
        mutf8::encode_into(s, &mut encoded);
        self.buffer.put_slice(&encoded);
        Ok(())
    }
}
