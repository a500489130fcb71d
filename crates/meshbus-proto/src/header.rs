//! Frame prefix and envelope header.
//!
//! ```text
//! [0..3]        int32    frame length (excludes these 4 bytes)
//! [4..7]        int32    destination mailbox id, or control id (< 0)
//! [8..11]       int32    destination count N          (mailbox frames only)
//! [12..12+4N)   int32[N] destination site ids
//! next byte     uint8    message tag
//! remainder              message payload
//! ```
//!
//! All fields are big-endian. The 8-byte prefix is shared by mailbox and
//! control frames and is parsed with a compile-time verified layout.

use bytes::{BufMut, BytesMut};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::network_endian::I32};

use crate::{
    codec::BufferReader,
    errors::{ProtocolError, Result},
    ids::{MailboxId, SiteId},
};

/// Reserved negative target ids carried by control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ControlId {
    /// One-shot readiness announcement after mesh formation
    Ready = -1,
    /// Replicated catalog blob
    Catalog = -2,
    /// Terminate the receiving process
    Poison = -3,
}

impl ControlId {
    /// Wire value.
    pub fn to_i32(self) -> i32 {
        self as i32
    }

    /// Parse a negative target id.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::Ready),
            -2 => Some(Self::Catalog),
            -3 => Some(Self::Poison),
            _ => None,
        }
    }
}

/// Fixed 8-byte prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FramePrefix {
    length: I32,
    target: I32,
}

impl FramePrefix {
    /// Encoded size.
    pub const SIZE: usize = 8;

    /// Bytes of the frame length field itself.
    pub const LENGTH_FIELD: usize = 4;

    /// Build a prefix for a frame whose bytes after the length field total
    /// `length`.
    pub fn new(length: i32, target: i32) -> Self {
        Self { length: I32::new(length), target: I32::new(target) }
    }

    /// Parse from exactly [`FramePrefix::SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from_bytes(bytes).map_err(|_| ProtocolError::UnexpectedEof {
            needed: Self::SIZE,
            remaining: bytes.len(),
        })
    }

    /// Serialize.
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Declared length of everything after the length field.
    pub fn length(&self) -> i32 {
        self.length.get()
    }

    /// Mailbox id or control id.
    pub fn target(&self) -> i32 {
        self.target.get()
    }

    /// Bytes that follow the prefix, validated against `max_frame`.
    pub fn remaining_len(&self, max_frame: usize) -> Result<usize> {
        let length = self.length();
        let invalid = || ProtocolError::FrameLength { len: i64::from(length), max: max_frame };
        let length = usize::try_from(length).map_err(|_| invalid())?;
        if length > max_frame {
            return Err(invalid());
        }
        length.checked_sub(Self::SIZE - Self::LENGTH_FIELD).ok_or_else(invalid)
    }
}

/// Routing header of a mailbox frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Mailbox the message is addressed to on every destination site
    pub mailbox: MailboxId,
    /// Destination sites, all on the receiving host
    pub destinations: Vec<SiteId>,
}

impl EnvelopeHeader {
    /// Bytes of header including the frame length field.
    pub fn encoded_len(&self) -> usize {
        FramePrefix::SIZE + 4 + 4 * self.destinations.len()
    }

    /// Write the frame prefix, destination count and destination list for a
    /// body of `body_len` bytes.
    pub fn write_to(&self, body_len: usize, out: &mut BytesMut) -> Result<()> {
        let total = self.encoded_len() - FramePrefix::LENGTH_FIELD + body_len;
        let length = i32::try_from(total)
            .map_err(|_| ProtocolError::FrameLength { len: total as i64, max: i32::MAX as usize })?;
        let count = i32::try_from(self.destinations.len())
            .map_err(|_| ProtocolError::DestinationCount(i32::MAX))?;

        out.reserve(self.encoded_len());
        out.put_slice(&FramePrefix::new(length, self.mailbox.0).to_bytes());
        out.put_i32(count);
        for site in &self.destinations {
            out.put_i32(site.0);
        }
        Ok(())
    }

    /// Read the destination list that follows a mailbox frame prefix.
    pub fn read_from(mailbox: MailboxId, reader: &mut BufferReader) -> Result<Self> {
        let count = reader.get_i32()?;
        let valid = usize::try_from(count).ok().filter(|n| n.saturating_mul(4) < reader.remaining());
        let Some(count) = valid else {
            return Err(ProtocolError::DestinationCount(count));
        };
        let destinations =
            (0..count).map(|_| reader.get_i32().map(SiteId)).collect::<Result<Vec<_>>>()?;
        Ok(Self { mailbox, destinations })
    }
}
