//! Protocol error types.

use thiserror::Error;

/// Result alias for codec and framing operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire data.
///
/// These are returned to the immediate caller and never retried: the input is
/// either untrusted wire data or the product of a software defect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer bytes remain than the field being read requires
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes required by the read
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// String or varbinary length exceeds the field limit
    #[error("field length {len} exceeds maximum {max}")]
    FieldTooLong {
        /// Declared or actual length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Length prefix is negative and not the null sentinel
    #[error("negative length prefix {0}")]
    NegativeLength(i32),

    /// Array has more elements than a 16-bit length prefix can describe
    #[error("array length {len} exceeds maximum {max}")]
    ArrayTooLong {
        /// Number of elements
        len: usize,
        /// Maximum encodable element count
        max: usize,
    },

    /// String bytes are not valid UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Type tag has no registered decoder
    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    /// Decoder did not consume the whole body
    #[error("decoder left {remaining} unconsumed bytes of {len}")]
    UnconsumedBytes {
        /// Bytes left after decoding
        remaining: usize,
        /// Total body length
        len: usize,
    },

    /// Frame declares a length outside the accepted range
    #[error("frame length {len} out of range (max {max})")]
    FrameLength {
        /// Declared frame length
        len: i64,
        /// Maximum accepted frame length
        max: usize,
    },

    /// Destination count is negative or disagrees with the frame length
    #[error("invalid destination count {0}")]
    DestinationCount(i32),

    /// Bootstrap control code is not valid in this direction
    #[error("unknown control code {0}")]
    UnknownControlCode(i32),

    /// Socket address string could not be parsed
    #[error("invalid socket address {0:?}")]
    InvalidAddress(String),

    /// Required field was encoded as null
    #[error("unexpected null for field {0}")]
    UnexpectedNull(&'static str),
}
