//! Message variants and tag dispatch.
//!
//! Each concrete message implements [`WireMessage`]. The [`Message`] enum is
//! the closed set of variants the transport can carry, and [`Message::decode`]
//! selects a decoder from a table indexed by the one-byte tag.
//!
//! A message's serialized size is always measured from its encoding; there is
//! no separate size computation that could drift from `encode`.

use bytes::Bytes;

use crate::{
    codec::{BufferReader, BufferWriter},
    errors::{ProtocolError, Result},
    payloads::{
        Acknowledgement, BinaryPayload, FailureSiteUpdate, Heartbeat, HeartbeatResponse,
        HostFailureNotice,
    },
    subject::Subject,
    tags::MessageTag,
};

/// Encoding capability shared by every concrete message type.
pub trait WireMessage: Sized {
    /// Tag identifying this type on the wire.
    const TAG: MessageTag;

    /// Local delivery subject.
    fn subject(&self) -> Subject {
        Subject::Default
    }

    /// Append the payload (without the tag).
    fn encode(&self, writer: &mut BufferWriter) -> Result<()>;

    /// Read the payload (without the tag).
    fn decode(reader: &mut BufferReader) -> Result<Self>;

    /// Payload size in bytes, measured by encoding.
    fn size(&self) -> Result<usize> {
        let mut writer = BufferWriter::with_capacity(64);
        self.encode(&mut writer)?;
        Ok(writer.len())
    }
}

/// Every message the transport can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Transaction heartbeat
    Heartbeat(Heartbeat),
    /// Heartbeat reply
    HeartbeatResponse(HeartbeatResponse),
    /// Failure agreement update
    FailureSiteUpdate(FailureSiteUpdate),
    /// Opaque payload
    BinaryPayload(BinaryPayload),
    /// Acknowledgement
    Acknowledgement(Acknowledgement),
    /// Host failure notice
    HostFailureNotice(HostFailureNotice),
}

type Decoder = fn(&mut BufferReader) -> Result<Message>;

fn decode_as<M: WireMessage + Into<Message>>(reader: &mut BufferReader) -> Result<Message> {
    M::decode(reader).map(Into::into)
}

/// Decoders indexed by `tag - 1`.
const DISPATCH: [(MessageTag, Decoder); 6] = [
    (MessageTag::Heartbeat, decode_as::<Heartbeat>),
    (MessageTag::HeartbeatResponse, decode_as::<HeartbeatResponse>),
    (MessageTag::FailureSiteUpdate, decode_as::<FailureSiteUpdate>),
    (MessageTag::BinaryPayload, decode_as::<BinaryPayload>),
    (MessageTag::Acknowledgement, decode_as::<Acknowledgement>),
    (MessageTag::HostFailureNotice, decode_as::<HostFailureNotice>),
];

fn decoder_for(tag: u8) -> Option<Decoder> {
    let (registered, decoder) = DISPATCH.get(usize::from(tag).checked_sub(1)?)?;
    debug_assert_eq!(registered.to_u8(), tag, "dispatch table out of order");
    Some(*decoder)
}

impl Message {
    /// Wire tag of the variant.
    pub fn tag(&self) -> MessageTag {
        match self {
            Self::Heartbeat(_) => Heartbeat::TAG,
            Self::HeartbeatResponse(_) => HeartbeatResponse::TAG,
            Self::FailureSiteUpdate(_) => FailureSiteUpdate::TAG,
            Self::BinaryPayload(_) => BinaryPayload::TAG,
            Self::Acknowledgement(_) => Acknowledgement::TAG,
            Self::HostFailureNotice(_) => HostFailureNotice::TAG,
        }
    }

    /// Local delivery subject of the variant.
    pub fn subject(&self) -> Subject {
        match self {
            Self::Heartbeat(m) => m.subject(),
            Self::HeartbeatResponse(m) => m.subject(),
            Self::FailureSiteUpdate(m) => m.subject(),
            Self::BinaryPayload(m) => m.subject(),
            Self::Acknowledgement(m) => m.subject(),
            Self::HostFailureNotice(m) => m.subject(),
        }
    }

    /// Whether local delivery should place this message ahead of queued
    /// messages of the same subject.
    pub fn is_priority(&self) -> bool {
        matches!(self, Self::FailureSiteUpdate(_))
    }

    /// Append the tag and payload.
    pub fn encode(&self, writer: &mut BufferWriter) -> Result<()> {
        writer.put_u8(self.tag().to_u8());
        match self {
            Self::Heartbeat(m) => m.encode(writer),
            Self::HeartbeatResponse(m) => m.encode(writer),
            Self::FailureSiteUpdate(m) => m.encode(writer),
            Self::BinaryPayload(m) => m.encode(writer),
            Self::Acknowledgement(m) => m.encode(writer),
            Self::HostFailureNotice(m) => m.encode(writer),
        }
    }

    /// Encode tag and payload into a standalone buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut writer = BufferWriter::with_capacity(64);
        self.encode(&mut writer)?;
        Ok(writer.freeze())
    }

    /// Encoded size including the tag byte.
    pub fn size(&self) -> Result<usize> {
        self.to_bytes().map(|bytes| bytes.len())
    }

    /// Decode a tag-prefixed body, requiring every byte to be consumed.
    pub fn decode(body: Bytes) -> Result<Self> {
        let mut reader = BufferReader::new(body);
        let tag = reader.get_u8()?;
        let decoder = decoder_for(tag).ok_or(ProtocolError::UnknownTag(tag))?;
        let message = decoder(&mut reader)?;
        reader.finish()?;
        Ok(message)
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(message: $variant) -> Self {
                    Self::$variant(message)
                }
            }
        )*
    };
}

impl_from_variant!(
    Heartbeat,
    HeartbeatResponse,
    FailureSiteUpdate,
    BinaryPayload,
    Acknowledgement,
    HostFailureNotice,
);
