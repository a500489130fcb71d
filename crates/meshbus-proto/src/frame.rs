//! Outbound frame assembly and inbound frame parsing.
//!
//! An outbound mailbox frame is written in two parts: a per-connection
//! header (prefix, destination count, destination list) and a message body
//! shared by every connection the message fans out to. [`EncodedBody`]
//! encodes the body at most once, on first use.

use std::sync::OnceLock;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    codec::{BufferReader, BufferWriter, PooledBuffer},
    errors::{ProtocolError, Result},
    header::{ControlId, EnvelopeHeader, FramePrefix},
    ids::{HostId, MailboxId},
    message::Message,
};

/// Message body encoded lazily, once, and shared between frames.
#[derive(Debug)]
pub struct EncodedBody {
    message: Message,
    encoded: OnceLock<Result<Bytes>>,
}

impl EncodedBody {
    /// Wrap a message without encoding it yet.
    pub fn new(message: Message) -> Self {
        Self { message, encoded: OnceLock::new() }
    }

    /// The wrapped message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// True once the body has been serialized.
    pub fn is_encoded(&self) -> bool {
        self.encoded.get().is_some()
    }

    /// Tag and payload bytes. Encodes on the first call only; later calls
    /// share the same buffer.
    pub fn bytes(&self) -> Result<Bytes> {
        self.encoded.get_or_init(|| self.message.to_bytes()).clone()
    }

    /// Write the header for `header` into a pooled buffer sized for this
    /// body.
    pub fn write_header(&self, header: &EnvelopeHeader, out: &mut PooledBuffer) -> Result<Bytes> {
        let body = self.bytes()?;
        if let Some(buf) = out.buffer_mut() {
            header.write_to(body.len(), buf)?;
        }
        Ok(body)
    }
}

/// Catalog blob propagated over the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogUpdate {
    /// Monotonic catalog version
    pub version: i32,
    /// Transaction that produced this catalog
    pub txn_id: i64,
    /// Serialized catalog
    pub catalog: Bytes,
}

/// Frame addressed to the transport itself rather than a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Sender has finished mesh formation
    Ready {
        /// Announcing host
        host: HostId,
    },
    /// Replicated catalog
    Catalog(CatalogUpdate),
    /// Receiver must terminate
    Poison {
        /// Diagnostic to report before terminating
        reason: String,
    },
}

impl ControlFrame {
    /// Reserved target id of this frame.
    pub fn id(&self) -> ControlId {
        match self {
            Self::Ready { .. } => ControlId::Ready,
            Self::Catalog(_) => ControlId::Catalog,
            Self::Poison { .. } => ControlId::Poison,
        }
    }

    /// Encode the complete frame, prefix included.
    pub fn encode(&self) -> Result<Bytes> {
        let mut writer = BufferWriter::with_capacity(64);
        writer.put_bytes(&FramePrefix::new(0, self.id().to_i32()).to_bytes());
        match self {
            Self::Ready { host } => writer.put_i32(host.0),
            Self::Catalog(update) => {
                writer.put_i32(update.version);
                writer.put_i64(update.txn_id);
                writer.put_varbinary(Some(&update.catalog))?;
            },
            Self::Poison { reason } => writer.put_string(Some(reason))?,
        }
        let length = writer.len() - FramePrefix::LENGTH_FIELD;
        let length = i32::try_from(length)
            .map_err(|_| ProtocolError::FrameLength { len: length as i64, max: i32::MAX as usize })?;
        writer.patch_i32(0, length)?;
        Ok(writer.freeze())
    }

    fn decode(id: ControlId, reader: &mut BufferReader) -> Result<Self> {
        let frame = match id {
            ControlId::Ready => Self::Ready { host: HostId(reader.get_i32()?) },
            ControlId::Catalog => Self::Catalog(CatalogUpdate {
                version: reader.get_i32()?,
                txn_id: reader.get_i64()?,
                catalog: reader.get_varbinary()?.ok_or(ProtocolError::UnexpectedNull("catalog"))?,
            }),
            ControlId::Poison => Self::Poison { reason: reader.get_string()?.unwrap_or_default() },
        };
        reader.finish()?;
        Ok(frame)
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Message for one or more local mailboxes
    Mailbox {
        /// Routing header
        header: EnvelopeHeader,
        /// Decoded message
        message: Message,
    },
    /// Transport control frame
    Control(ControlFrame),
}

impl InboundFrame {
    /// Parse the bytes following a [`FramePrefix`].
    pub fn decode(prefix: FramePrefix, rest: Bytes) -> Result<Self> {
        let mut reader = BufferReader::new(rest);
        let target = prefix.target();
        if target >= 0 {
            let header = EnvelopeHeader::read_from(MailboxId(target), &mut reader)?;
            let message = Message::decode(reader.get_rest())?;
            return Ok(Self::Mailbox { header, message });
        }
        let id = ControlId::from_i32(target).ok_or(ProtocolError::UnknownControlCode(target))?;
        ControlFrame::decode(id, &mut reader).map(Self::Control)
    }

    /// Parse a complete frame held in one buffer, prefix included.
    pub fn decode_frame(frame: Bytes, max_frame: usize) -> Result<Self> {
        if frame.len() < FramePrefix::SIZE {
            return Err(ProtocolError::UnexpectedEof {
                needed: FramePrefix::SIZE,
                remaining: frame.len(),
            });
        }
        let prefix = FramePrefix::from_bytes(&frame[..FramePrefix::SIZE])?;
        let rest_len = prefix.remaining_len(max_frame)?;
        let rest = frame.slice(FramePrefix::SIZE..);
        if rest.len() != rest_len {
            return Err(ProtocolError::FrameLength {
                len: i64::from(prefix.length()),
                max: frame.len() - FramePrefix::LENGTH_FIELD,
            });
        }
        Self::decode(prefix, rest)
    }
}

/// Encode a complete mailbox frame into a single buffer.
///
/// The transport writes header and body separately; this form is for tests
/// and tools that want one contiguous frame.
pub fn encode_mailbox_frame(header: &EnvelopeHeader, message: &Message) -> Result<Bytes> {
    let body = message.to_bytes()?;
    let mut out = BytesMut::with_capacity(header.encoded_len() + body.len());
    header.write_to(body.len(), &mut out)?;
    out.put_slice(&body);
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::{
        codec::BufferPool,
        ids::SiteId,
        payloads::{Acknowledgement, Heartbeat},
    };

    const MAX: usize = 1 << 20;

    fn heartbeat() -> Message {
        Heartbeat { txn_id: 42, last_safe_txn_id: 40 }.into()
    }

    #[test]
    fn mailbox_frame_wire_layout() {
        let header =
            EnvelopeHeader { mailbox: MailboxId(7), destinations: vec![SiteId(101), SiteId(102)] };
        let frame = encode_mailbox_frame(&header, &heartbeat()).unwrap();

        insta::assert_snapshot!(
            hex::encode(&frame),
            @"000000210000000700000002000000650000006601000000000000002a0000000000000028"
        );
        assert_eq!(frame.len(), 4 + 0x21);
    }

    #[test]
    fn mailbox_frame_decodes() {
        let header =
            EnvelopeHeader { mailbox: MailboxId(3), destinations: vec![SiteId(1), SiteId(2)] };
        let message: Message = Acknowledgement {
            txn_id: 5,
            source: SiteId(2),
            status: Some("ok".into()),
            sites: vec![SiteId(1)],
        }
        .into();
        let frame = encode_mailbox_frame(&header, &message).unwrap();

        match InboundFrame::decode_frame(frame, MAX).unwrap() {
            InboundFrame::Mailbox { header: got, message: decoded } => {
                assert_eq!(got, header);
                assert_eq!(decoded, message);
            },
            other => panic!("expected mailbox frame, got {other:?}"),
        }
    }

    #[test]
    fn zero_destinations_allowed() {
        let header = EnvelopeHeader { mailbox: MailboxId(0), destinations: vec![] };
        let frame = encode_mailbox_frame(&header, &heartbeat()).unwrap();
        let decoded = InboundFrame::decode_frame(frame, MAX).unwrap();
        assert!(matches!(decoded, InboundFrame::Mailbox { header, .. } if header.destinations.is_empty()));
    }

    #[test]
    fn control_frames_round_trip() {
        let frames = [
            ControlFrame::Ready { host: HostId(4) },
            ControlFrame::Catalog(CatalogUpdate {
                version: 2,
                txn_id: 99,
                catalog: Bytes::from_static(b"catalog"),
            }),
            ControlFrame::Poison { reason: "bad deployment".into() },
        ];
        for frame in frames {
            let bytes = frame.encode().unwrap();
            let decoded = InboundFrame::decode_frame(bytes, MAX).unwrap();
            assert_eq!(decoded, InboundFrame::Control(frame));
        }
    }

    #[test]
    fn ready_frame_layout() {
        let bytes = ControlFrame::Ready { host: HostId(1) }.encode().unwrap();
        assert_eq!(&bytes[..], &hex!("00000008 ffffffff 00000001"));
    }

    #[test]
    fn unknown_control_id_rejected() {
        const FRAME: [u8; 8] = hex!("00000004 fffffff0");
        let bytes = Bytes::from_static(&FRAME);
        let err = InboundFrame::decode_frame(bytes, MAX).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownControlCode(-16));
    }

    #[test]
    fn truncated_frame_rejected() {
        let header = EnvelopeHeader { mailbox: MailboxId(0), destinations: vec![SiteId(1)] };
        let frame = encode_mailbox_frame(&header, &heartbeat()).unwrap();
        let short = frame.slice(..frame.len() - 1);
        assert!(InboundFrame::decode_frame(short, MAX).is_err());
    }

    #[test]
    fn body_is_encoded_once_and_shared() {
        let body = EncodedBody::new(heartbeat());
        assert!(!body.is_encoded());

        let pool = BufferPool::new(4, 64);
        let first = EnvelopeHeader { mailbox: MailboxId(1), destinations: vec![SiteId(101)] };
        let second = EnvelopeHeader { mailbox: MailboxId(1), destinations: vec![SiteId(201)] };

        let mut a = pool.acquire();
        let mut b = pool.acquire();
        let body_a = body.write_header(&first, &mut a).unwrap();
        let body_b = body.write_header(&second, &mut b).unwrap();

        assert!(body.is_encoded());
        assert_eq!(body_a.as_ptr(), body_b.as_ptr(), "fan-out must share one encoding");
        assert_eq!(a.as_slice().len(), first.encoded_len());
    }
}
