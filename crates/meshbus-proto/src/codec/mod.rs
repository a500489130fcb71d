//! Binary buffer codec.
//!
//! [`BufferWriter`] appends primitives, length-prefixed strings, varbinary and
//! homogeneous arrays to a growable buffer. [`BufferReader`] reads them back
//! with bounds checks on every access.
//!
//! # Layout rules
//!
//! - Integers use the writer's [`ByteOrder`], big-endian unless configured
//! - Strings and varbinary carry an `i32` length prefix; `-1` encodes null
//! - Arrays carry an `i16` element count and cannot be null
//! - Strings and varbinary are limited to [`MAX_FIELD_LEN`] bytes

mod pool;
mod reader;
mod writer;

pub use pool::{BufferPool, PooledBuffer};
pub use reader::BufferReader;
pub use writer::{BufferWriter, GrowthCallback};

/// Largest string or varbinary field accepted by the codec (1 MiB).
pub const MAX_FIELD_LEN: usize = 1024 * 1024;

/// Largest array accepted by the codec (16-bit signed length prefix).
pub const MAX_ARRAY_LEN: usize = i16::MAX as usize;

/// Length prefix encoding a null string or varbinary.
pub const NULL_LENGTH: i32 = -1;

/// Byte order used for multi-byte integers and floats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network byte order
    #[default]
    BigEndian,
    /// Native order on common hardware
    LittleEndian,
}
