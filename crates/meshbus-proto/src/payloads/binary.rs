//! Opaque payload carrier.

use bytes::Bytes;

use crate::{
    codec::{BufferReader, BufferWriter},
    errors::Result,
    message::WireMessage,
    tags::MessageTag,
};

/// Metadata and payload blobs the messaging layer does not interpret.
///
/// Either part may be null. Decoding shares the frame's allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPayload {
    /// Small descriptor interpreted by the receiver
    pub metadata: Option<Bytes>,
    /// Body
    pub payload: Option<Bytes>,
}

impl WireMessage for BinaryPayload {
    const TAG: MessageTag = MessageTag::BinaryPayload;

    fn encode(&self, writer: &mut BufferWriter) -> Result<()> {
        writer.put_varbinary(self.metadata.as_deref())?;
        writer.put_varbinary(self.payload.as_deref())
    }

    fn decode(reader: &mut BufferReader) -> Result<Self> {
        Ok(Self { metadata: reader.get_varbinary()?, payload: reader.get_varbinary()? })
    }
}
