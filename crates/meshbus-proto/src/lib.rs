//! Wire format for the meshbus cluster messaging substrate.
//!
//! Every byte that crosses a host-to-host connection is produced here. Frames
//! carry a fixed 8-byte prefix (frame length and target mailbox or control id)
//! followed either by a destination list and a tagged message body, or by a
//! control payload. Message bodies are encoded with the [`codec`] module, a
//! growable big-endian writer and a bounds-checked reader.
//!
//! All cluster members are assumed to run compatible builds. There is no
//! version negotiation: an unknown message tag is a protocol error that the
//! transport escalates instead of skipping.
//!
//! # Modules
//!
//! - [`codec`]: primitive, string, varbinary and array encoding plus the
//!   buffer pool used for outbound frame headers
//! - [`ids`]: host, site, mailbox and combined HSId identifiers
//! - [`header`]: frame prefix and envelope header layout
//! - [`message`]: the closed set of message variants and tag dispatch
//! - [`frame`]: outbound frame assembly and inbound frame parsing
//! - [`control`]: bootstrap control stream messages and failure bitmask
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod control;
pub mod errors;
pub mod frame;
pub mod header;
pub mod ids;
pub mod message;
pub mod payloads;
pub mod subject;
pub mod tags;

pub use control::{Command, ConsistencyReport, ControlMessage, InstanceId, JoinFailure, RejoinRequest, Reply};
pub use codec::{BufferPool, BufferReader, BufferWriter, ByteOrder, PooledBuffer};
pub use errors::{ProtocolError, Result};
pub use frame::{CatalogUpdate, ControlFrame, EncodedBody, InboundFrame, encode_mailbox_frame};
pub use header::{ControlId, EnvelopeHeader, FramePrefix};
pub use ids::{HostId, HsId, MailboxId, SiteId};
pub use message::{Message, WireMessage};
pub use subject::Subject;
pub use tags::MessageTag;
