//! Bounds-checked buffer reader.

use bytes::Bytes;

use super::{ByteOrder, MAX_FIELD_LEN, NULL_LENGTH};
use crate::errors::{ProtocolError, Result};

/// Cursor over an immutable buffer.
///
/// Every read checks the remaining length first, so malformed input yields a
/// [`ProtocolError`] instead of a panic. Varbinary reads share the underlying
/// allocation rather than copying.
#[derive(Debug, Clone)]
pub struct BufferReader {
    buf: Bytes,
    pos: usize,
    order: ByteOrder,
}

impl BufferReader {
    /// Create a big-endian reader.
    pub fn new(buf: Bytes) -> Self {
        Self::with_order(buf, ByteOrder::BigEndian)
    }

    /// Create a reader with the given byte order.
    pub fn with_order(buf: Bytes, order: ByteOrder) -> Self {
        Self { buf, pos: 0, order }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Verify every byte has been consumed.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(ProtocolError::UnconsumedBytes { remaining, len: self.buf.len() }),
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let remaining = self.remaining();
        if remaining < N {
            return Err(ProtocolError::UnexpectedEof { needed: N, remaining });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Read `len` raw bytes, sharing the underlying allocation.
    pub fn get_bytes(&mut self, len: usize) -> Result<Bytes> {
        let remaining = self.remaining();
        if remaining < len {
            return Err(ProtocolError::UnexpectedEof { needed: len, remaining });
        }
        let out = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    /// Read every unconsumed byte.
    pub fn get_rest(&mut self) -> Bytes {
        let out = self.buf.slice(self.pos..);
        self.pos = self.buf.len();
        out
    }

    /// Read a signed byte.
    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.take::<1>()?))
    }

    /// Read an unsigned byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a boolean; any non-zero byte is `true`.
    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Read a 16-bit integer.
    pub fn get_i16(&mut self) -> Result<i16> {
        let bytes = self.take::<2>()?;
        Ok(match self.order {
            ByteOrder::BigEndian => i16::from_be_bytes(bytes),
            ByteOrder::LittleEndian => i16::from_le_bytes(bytes),
        })
    }

    /// Read a 32-bit integer.
    pub fn get_i32(&mut self) -> Result<i32> {
        let bytes = self.take::<4>()?;
        Ok(match self.order {
            ByteOrder::BigEndian => i32::from_be_bytes(bytes),
            ByteOrder::LittleEndian => i32::from_le_bytes(bytes),
        })
    }

    /// Read a 64-bit integer.
    pub fn get_i64(&mut self) -> Result<i64> {
        let bytes = self.take::<8>()?;
        Ok(match self.order {
            ByteOrder::BigEndian => i64::from_be_bytes(bytes),
            ByteOrder::LittleEndian => i64::from_le_bytes(bytes),
        })
    }

    /// Read a 64-bit float.
    pub fn get_f64(&mut self) -> Result<f64> {
        let bytes = self.take::<8>()?;
        Ok(match self.order {
            ByteOrder::BigEndian => f64::from_be_bytes(bytes),
            ByteOrder::LittleEndian => f64::from_le_bytes(bytes),
        })
    }

    /// Read a length-prefixed byte string; the null sentinel yields `None`.
    pub fn get_varbinary(&mut self) -> Result<Option<Bytes>> {
        let len = self.get_i32()?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        if len < 0 {
            return Err(ProtocolError::NegativeLength(len));
        }
        let len = len as usize;
        if len > MAX_FIELD_LEN {
            return Err(ProtocolError::FieldTooLong { len, max: MAX_FIELD_LEN });
        }
        self.get_bytes(len).map(Some)
    }

    /// Read a length-prefixed UTF-8 string; the null sentinel yields `None`.
    pub fn get_string(&mut self) -> Result<Option<String>> {
        match self.get_varbinary()? {
            None => Ok(None),
            Some(bytes) => {
                String::from_utf8(bytes.to_vec()).map(Some).map_err(|_| ProtocolError::InvalidUtf8)
            },
        }
    }

    fn get_array_len(&mut self) -> Result<usize> {
        let len = self.get_i16()?;
        if len < 0 {
            return Err(ProtocolError::NegativeLength(i32::from(len)));
        }
        Ok(len as usize)
    }

    fn get_array<T>(&mut self, mut read: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.get_array_len()?;
        // Each element occupies at least one byte, so a count beyond the
        // remaining bytes is malformed and must not drive the allocation.
        if len > self.remaining() {
            return Err(ProtocolError::UnexpectedEof { needed: len, remaining: self.remaining() });
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(read(self)?);
        }
        Ok(out)
    }

    /// Read an array of signed bytes.
    pub fn get_i8_array(&mut self) -> Result<Vec<i8>> {
        self.get_array(Self::get_i8)
    }

    /// Read an array of 16-bit integers.
    pub fn get_i16_array(&mut self) -> Result<Vec<i16>> {
        self.get_array(Self::get_i16)
    }

    /// Read an array of 32-bit integers.
    pub fn get_i32_array(&mut self) -> Result<Vec<i32>> {
        self.get_array(Self::get_i32)
    }

    /// Read an array of 64-bit integers.
    pub fn get_i64_array(&mut self) -> Result<Vec<i64>> {
        self.get_array(Self::get_i64)
    }

    /// Read an array of nullable strings.
    pub fn get_string_array(&mut self) -> Result<Vec<Option<String>>> {
        self.get_array(Self::get_string)
    }
}
