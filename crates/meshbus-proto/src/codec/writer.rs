//! Growable buffer writer.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::{ByteOrder, MAX_ARRAY_LEN, MAX_FIELD_LEN, NULL_LENGTH};
use crate::errors::{ProtocolError, Result};

/// Invoked after the writer reallocates, with the bytes written so far and
/// the new capacity.
///
/// Lets a caller keep an external view of the buffer (for example memory
/// shared with a native subsystem) in sync after the backing storage moves.
pub type GrowthCallback = Box<dyn FnMut(&[u8], usize) + Send>;

/// Append-only binary writer over a growable buffer.
///
/// When fewer bytes remain than a write needs, capacity grows to at least
/// twice the previous capacity. Bytes already written are preserved at their
/// offsets.
pub struct BufferWriter {
    buf: BytesMut,
    order: ByteOrder,
    on_growth: Option<GrowthCallback>,
}

impl BufferWriter {
    /// Initial capacity used by [`BufferWriter::new`].
    pub const DEFAULT_CAPACITY: usize = 2048;

    /// Create a big-endian writer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create a big-endian writer with an explicit initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), order: ByteOrder::BigEndian, on_growth: None }
    }

    /// Create a writer with the given byte order.
    pub fn with_order(order: ByteOrder) -> Self {
        Self { order, ..Self::new() }
    }

    /// Wrap an existing buffer, appending after its current contents.
    pub fn from_buffer(buf: BytesMut) -> Self {
        Self { buf, order: ByteOrder::BigEndian, on_growth: None }
    }

    /// Register the growth callback, replacing any previous one.
    pub fn on_growth(&mut self, callback: GrowthCallback) {
        self.on_growth = Some(callback);
    }

    /// Byte order used by this writer.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current capacity of the backing buffer.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// View of the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning the mutable buffer.
    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    /// Consume the writer, returning an immutable shareable buffer.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    fn ensure(&mut self, additional: usize) {
        let len = self.buf.len();
        let capacity = self.buf.capacity();
        if capacity - len >= additional {
            return;
        }

        let target = capacity.saturating_mul(2).max(len + additional);
        self.buf.reserve(target - len);

        if let Some(callback) = self.on_growth.as_mut() {
            callback(&self.buf[..], self.buf.capacity());
        }
    }

    /// Write a signed byte.
    pub fn put_i8(&mut self, value: i8) {
        self.ensure(1);
        self.buf.put_i8(value);
    }

    /// Write an unsigned byte.
    pub fn put_u8(&mut self, value: u8) {
        self.ensure(1);
        self.buf.put_u8(value);
    }

    /// Write a boolean as a single byte (`0` or `1`).
    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    /// Write a 16-bit integer.
    pub fn put_i16(&mut self, value: i16) {
        self.ensure(2);
        match self.order {
            ByteOrder::BigEndian => self.buf.put_i16(value),
            ByteOrder::LittleEndian => self.buf.put_i16_le(value),
        }
    }

    /// Write a 32-bit integer.
    pub fn put_i32(&mut self, value: i32) {
        self.ensure(4);
        match self.order {
            ByteOrder::BigEndian => self.buf.put_i32(value),
            ByteOrder::LittleEndian => self.buf.put_i32_le(value),
        }
    }

    /// Write a 64-bit integer.
    pub fn put_i64(&mut self, value: i64) {
        self.ensure(8);
        match self.order {
            ByteOrder::BigEndian => self.buf.put_i64(value),
            ByteOrder::LittleEndian => self.buf.put_i64_le(value),
        }
    }

    /// Write a 64-bit float.
    pub fn put_f64(&mut self, value: f64) {
        self.ensure(8);
        match self.order {
            ByteOrder::BigEndian => self.buf.put_f64(value),
            ByteOrder::LittleEndian => self.buf.put_f64_le(value),
        }
    }

    /// Write raw bytes with no length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.buf.put_slice(bytes);
    }

    /// Overwrite a previously written 32-bit integer at `offset`.
    ///
    /// Used to back-fill length prefixes after the body has been encoded.
    pub fn patch_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        let end = offset.checked_add(4).filter(|end| *end <= self.buf.len()).ok_or(
            ProtocolError::UnexpectedEof {
                needed: 4,
                remaining: self.buf.len().saturating_sub(offset),
            },
        )?;
        let bytes = match self.order {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        };
        self.buf[offset..end].copy_from_slice(&bytes);
        Ok(())
    }

    /// Write a UTF-8 string with an `i32` length prefix; `None` writes the
    /// null sentinel.
    pub fn put_string(&mut self, value: Option<&str>) -> Result<()> {
        self.put_varbinary(value.map(str::as_bytes))
    }

    /// Write a byte string with an `i32` length prefix; `None` writes the
    /// null sentinel.
    pub fn put_varbinary(&mut self, value: Option<&[u8]>) -> Result<()> {
        let Some(bytes) = value else {
            self.put_i32(NULL_LENGTH);
            return Ok(());
        };
        if bytes.len() > MAX_FIELD_LEN {
            return Err(ProtocolError::FieldTooLong { len: bytes.len(), max: MAX_FIELD_LEN });
        }
        self.ensure(4 + bytes.len());
        self.put_i32(bytes.len() as i32);
        self.put_bytes(bytes);
        Ok(())
    }

    fn put_array_len(&mut self, len: usize) -> Result<()> {
        if len > MAX_ARRAY_LEN {
            return Err(ProtocolError::ArrayTooLong { len, max: MAX_ARRAY_LEN });
        }
        self.put_i16(len as i16);
        Ok(())
    }

    /// Write an array of signed bytes.
    pub fn put_i8_array(&mut self, values: &[i8]) -> Result<()> {
        self.put_array_len(values.len())?;
        self.ensure(values.len());
        values.iter().for_each(|v| self.buf.put_i8(*v));
        Ok(())
    }

    /// Write an array of 16-bit integers.
    pub fn put_i16_array(&mut self, values: &[i16]) -> Result<()> {
        self.put_array_len(values.len())?;
        self.ensure(values.len() * 2);
        values.iter().for_each(|v| self.put_i16(*v));
        Ok(())
    }

    /// Write an array of 32-bit integers.
    pub fn put_i32_array(&mut self, values: &[i32]) -> Result<()> {
        self.put_array_len(values.len())?;
        self.ensure(values.len() * 4);
        values.iter().for_each(|v| self.put_i32(*v));
        Ok(())
    }

    /// Write an array of 64-bit integers.
    pub fn put_i64_array(&mut self, values: &[i64]) -> Result<()> {
        self.put_array_len(values.len())?;
        self.ensure(values.len() * 8);
        values.iter().for_each(|v| self.put_i64(*v));
        Ok(())
    }

    /// Write an array of nullable strings.
    pub fn put_string_array(&mut self, values: &[Option<String>]) -> Result<()> {
        if let Some(too_long) = values.iter().flatten().find(|s| s.len() > MAX_FIELD_LEN) {
            return Err(ProtocolError::FieldTooLong { len: too_long.len(), max: MAX_FIELD_LEN });
        }
        self.put_array_len(values.len())?;
        for value in values {
            self.put_string(value.as_deref())?;
        }
        Ok(())
    }
}

impl Default for BufferWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferWriter")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .field("order", &self.order)
            .field("on_growth", &self.on_growth.is_some())
            .finish()
    }
}
