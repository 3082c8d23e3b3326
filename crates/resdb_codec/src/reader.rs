//! Big-endian data reader.

use crate::error::{CodecError, CodecResult};
use crate::mutf8;
use crate::writer::NULL_STRING_LEN;
use bytes::Buf;

/// Reads primitives written by [`crate::DataWriter`] from a byte slice.
#[derive(Debug, Clone)]
pub struct DataReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Creates a reader positioned at `pos`.
    ///
    /// # Errors
    ///
    /// Fails if `pos` lies past the end of `data`.
    pub fn at(data: &'a [u8], pos: usize) -> CodecResult<Self> {
        if pos > data.len() {
            return Err(CodecError::UnexpectedEof {
                pos: data.len(),
                needed: pos - data.len(),
            });
        }
        Ok(Self { data, pos })
    }

    /// Current read position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                pos: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads one byte.
    pub fn get_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?.get_u8())
    }

    /// Reads a one-byte boolean; any non-zero byte is `true`.
    pub fn get_bool(&mut self) -> CodecResult<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Reads a big-endian `i32`.
    pub fn get_i32(&mut self) -> CodecResult<i32> {
        Ok(self.take(4)?.get_i32())
    }

    /// Reads a big-endian `i64`.
    pub fn get_i64(&mut self) -> CodecResult<i64> {
        Ok(self.take(8)?.get_i64())
    }

    /// Reads a big-endian `f32`.
    pub fn get_f32(&mut self) -> CodecResult<f32> {
        Ok(self.take(4)?.get_f32())
    }

    /// Reads `n` raw bytes.
    pub fn get_bytes(&mut self, n: usize) -> CodecResult<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Reads an element count and checks that it is not negative.
    pub fn get_count(&mut self) -> CodecResult<usize> {
        let count = self.get_i32()?;
        usize::try_from(count).map_err(|_| CodecError::NegativeCount(count))
    }

    /// Reads a nullable string, peeking the length for the `-1` sentinel.
    pub fn get_utf(&mut self) -> CodecResult<Option<String>> {
        let start = self.pos;
        let len = self.take(2)?.get_u16();
        if len as i16 == NULL_STRING_LEN {
            return Ok(None);
        }
        let bytes = self.take(usize::from(len))?;
        mutf8::decode(bytes, start).map(Some)
    }

    /// Reads a string that must not be null.
    pub fn get_required_utf(&mut self, field: &str) -> CodecResult<String> {
        self.get_utf()?
            .ok_or_else(|| CodecError::invalid_structure(format!("{field} is null")))
    }
}
