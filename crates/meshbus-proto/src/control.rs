//! Bootstrap control stream messages.
//!
//! Mesh formation and rejoin run over a dedicated framed stream, separate from
//! mailbox traffic:
//!
//! ```text
//! [0..3]   int32   length of code + payload
//! [4..7]   int32   control code
//! [8..)            payload, BufferCodec encoded
//! ```
//!
//! Codes are scoped by direction. [`Command`] travels from the directing side
//! (the coordinator, or the rejoining host when it answers a member) and
//! [`Reply`] travels back.

use std::net::SocketAddr;

use bitflags::bitflags;
use bytes::Bytes;

use crate::{
    codec::{BufferReader, BufferWriter},
    errors::{ProtocolError, Result},
    ids::HostId,
};

/// Bytes of the length field in a control frame.
pub const LENGTH_FIELD: usize = 4;

bitflags! {
    /// Reasons a bootstrap or rejoin was refused.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct JoinFailure: i32 {
        /// Clock skew exceeds the configured maximum
        const NTP = 1;
        /// Catalog checksum mismatch
        const CRC = 2;
        /// Host id conflict
        const HOSTID = 4;
        /// Catalog version mismatch
        const CATVER = 8;
        /// Deployment checksum mismatch
        const DEPCRC = 16;
        /// Catalog transaction id mismatch
        const CATTXNID = 32;
        /// Live-host set or restore flag disagreement
        const FAULT_MISMATCH = 64;
    }
}

/// Identity of one cluster incarnation: when it formed and who formed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    /// Formation wall-clock time in milliseconds
    pub timestamp: i64,
    /// Coordinator address as `ip:port`
    pub coordinator: String,
}

impl InstanceId {
    fn encode(&self, writer: &mut BufferWriter) -> Result<()> {
        writer.put_i64(self.timestamp);
        writer.put_string(Some(&self.coordinator))
    }

    fn decode(reader: &mut BufferReader) -> Result<Self> {
        Ok(Self {
            timestamp: reader.get_i64()?,
            coordinator: reader.get_string()?.ok_or(ProtocolError::UnexpectedNull("coordinator"))?,
        })
    }
}

/// Values each participant contributes to the consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsistencyReport {
    /// Reporting host
    pub host: HostId,
    /// Wall clock at the time of reporting, milliseconds
    pub wall_clock_ms: i64,
    /// Catalog checksum
    pub catalog_crc: i64,
    /// Deployment checksum
    pub deployment_crc: i64,
    /// Catalog version
    pub catalog_version: i32,
    /// Transaction that produced the catalog
    pub catalog_txn_id: i64,
}

impl ConsistencyReport {
    fn encode(&self, writer: &mut BufferWriter) {
        writer.put_i32(self.host.0);
        writer.put_i64(self.wall_clock_ms);
        writer.put_i64(self.catalog_crc);
        writer.put_i64(self.deployment_crc);
        writer.put_i32(self.catalog_version);
        writer.put_i64(self.catalog_txn_id);
    }

    fn decode(reader: &mut BufferReader) -> Result<Self> {
        Ok(Self {
            host: HostId(reader.get_i32()?),
            wall_clock_ms: reader.get_i64()?,
            catalog_crc: reader.get_i64()?,
            deployment_crc: reader.get_i64()?,
            catalog_version: reader.get_i32()?,
            catalog_txn_id: reader.get_i64()?,
        })
    }
}

/// Sent by a live member to a rejoining host to admit it into the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejoinRequest {
    /// Member sending the request
    pub member: HostId,
    /// Host id the rejoining process will use
    pub assigned: HostId,
    /// Running cluster's incarnation
    pub instance: InstanceId,
    /// Running cluster's initial transaction id
    pub initial_txn_id: i64,
    /// Live hosts as seen by the member, excluding the rejoining host
    pub live_hosts: Vec<HostId>,
    /// Whether the cluster has already performed its restore
    pub restore_done: bool,
    /// Member's consistency values
    pub report: ConsistencyReport,
}

/// Downstream control messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Connect to `host` at `addr` and add the edge to the mesh
    Connect {
        /// Peer to connect to
        host: HostId,
        /// Peer's internal listen address
        addr: SocketAddr,
    },
    /// Accept one inbound peer connection
    Listen,
    /// Bootstrap or rejoin succeeded
    Complete,
    /// Report wall clock and checksums
    SendTimeAndCrc,
    /// Bootstrap or rejoin refused
    JoinFail(JoinFailure),
    /// Host id and cluster identity assigned to a new follower
    Welcome {
        /// Assigned host id
        host: HostId,
        /// Cluster incarnation
        instance: InstanceId,
        /// Initial global transaction id
        initial_txn_id: i64,
    },
    /// Member asking a rejoining host to join the running mesh
    RejoinRequest(RejoinRequest),
}

/// Upstream control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Ready to accept the peer announced by the preceding LISTEN
    Listening,
    /// Peer connection established
    Connected,
    /// Follower's first message, announcing where it accepts peers
    Hello {
        /// Internal listen port
        internal_port: u16,
    },
    /// Response to SENDTIME_AND_CRC
    TimeAndCrc(ConsistencyReport),
}

/// A message carried by the bootstrap control stream.
pub trait ControlMessage: Sized {
    /// Control code.
    fn code(&self) -> i32;

    /// Append the payload.
    fn encode_payload(&self, writer: &mut BufferWriter) -> Result<()>;

    /// Read the payload for `code`.
    fn decode_payload(code: i32, reader: &mut BufferReader) -> Result<Self>;

    /// Encode the complete frame, length field included.
    fn to_frame(&self) -> Result<Bytes> {
        let mut writer = BufferWriter::with_capacity(64);
        writer.put_i32(0);
        writer.put_i32(self.code());
        self.encode_payload(&mut writer)?;
        let length = writer.len() - LENGTH_FIELD;
        let length = i32::try_from(length)
            .map_err(|_| ProtocolError::FrameLength { len: length as i64, max: i32::MAX as usize })?;
        writer.patch_i32(0, length)?;
        Ok(writer.freeze())
    }

    /// Decode the bytes following the length field.
    fn from_body(body: Bytes) -> Result<Self> {
        let mut reader = BufferReader::new(body);
        let code = reader.get_i32()?;
        let message = Self::decode_payload(code, &mut reader)?;
        reader.finish()?;
        Ok(message)
    }
}

fn put_addr(writer: &mut BufferWriter, addr: SocketAddr) -> Result<()> {
    writer.put_string(Some(&addr.to_string()))
}

fn get_addr(reader: &mut BufferReader) -> Result<SocketAddr> {
    let text = reader.get_string()?.ok_or(ProtocolError::UnexpectedNull("address"))?;
    text.parse().map_err(|_| ProtocolError::InvalidAddress(text))
}

impl Command {
    const CONNECT: i32 = 1;
    const LISTEN: i32 = 2;
    const COMPLETE: i32 = 3;
    const SENDTIME_AND_CRC: i32 = 4;
    const JOINFAIL: i32 = 5;
    const WELCOME: i32 = 6;
    const REJOIN_REQUEST: i32 = 7;
}

impl ControlMessage for Command {
    fn code(&self) -> i32 {
        match self {
            Self::Connect { .. } => Self::CONNECT,
            Self::Listen => Self::LISTEN,
            Self::Complete => Self::COMPLETE,
            Self::SendTimeAndCrc => Self::SENDTIME_AND_CRC,
            Self::JoinFail(_) => Self::JOINFAIL,
            Self::Welcome { .. } => Self::WELCOME,
            Self::RejoinRequest(_) => Self::REJOIN_REQUEST,
        }
    }

    fn encode_payload(&self, writer: &mut BufferWriter) -> Result<()> {
        match self {
            Self::Connect { host, addr } => {
                writer.put_i32(host.0);
                put_addr(writer, *addr)?;
            },
            Self::Listen | Self::Complete | Self::SendTimeAndCrc => {},
            Self::JoinFail(bits) => writer.put_i32(bits.bits()),
            Self::Welcome { host, instance, initial_txn_id } => {
                writer.put_i32(host.0);
                instance.encode(writer)?;
                writer.put_i64(*initial_txn_id);
            },
            Self::RejoinRequest(request) => {
                writer.put_i32(request.member.0);
                writer.put_i32(request.assigned.0);
                request.instance.encode(writer)?;
                writer.put_i64(request.initial_txn_id);
                let hosts: Vec<i32> = request.live_hosts.iter().map(|host| host.0).collect();
                writer.put_i32_array(&hosts)?;
                writer.put_bool(request.restore_done);
                request.report.encode(writer);
            },
        }
        Ok(())
    }

    fn decode_payload(code: i32, reader: &mut BufferReader) -> Result<Self> {
        Ok(match code {
            Self::CONNECT => Self::Connect { host: HostId(reader.get_i32()?), addr: get_addr(reader)? },
            Self::LISTEN => Self::Listen,
            Self::COMPLETE => Self::Complete,
            Self::SENDTIME_AND_CRC => Self::SendTimeAndCrc,
            Self::JOINFAIL => Self::JoinFail(JoinFailure::from_bits_retain(reader.get_i32()?)),
            Self::WELCOME => Self::Welcome {
                host: HostId(reader.get_i32()?),
                instance: InstanceId::decode(reader)?,
                initial_txn_id: reader.get_i64()?,
            },
            Self::REJOIN_REQUEST => Self::RejoinRequest(RejoinRequest {
                member: HostId(reader.get_i32()?),
                assigned: HostId(reader.get_i32()?),
                instance: InstanceId::decode(reader)?,
                initial_txn_id: reader.get_i64()?,
                live_hosts: reader.get_i32_array()?.into_iter().map(HostId).collect(),
                restore_done: reader.get_bool()?,
                report: ConsistencyReport::decode(reader)?,
            }),
            other => return Err(ProtocolError::UnknownControlCode(other)),
        })
    }
}

impl Reply {
    const LISTENING: i32 = 0;
    const CONNECTED: i32 = 1;
    const HELLO: i32 = 2;
    const TIME_AND_CRC: i32 = 3;
}

impl ControlMessage for Reply {
    fn code(&self) -> i32 {
        match self {
            Self::Listening => Self::LISTENING,
            Self::Connected => Self::CONNECTED,
            Self::Hello { .. } => Self::HELLO,
            Self::TimeAndCrc(_) => Self::TIME_AND_CRC,
        }
    }

    fn encode_payload(&self, writer: &mut BufferWriter) -> Result<()> {
        match self {
            Self::Listening | Self::Connected => {},
            Self::Hello { internal_port } => writer.put_i32(i32::from(*internal_port)),
            Self::TimeAndCrc(report) => report.encode(writer),
        }
        Ok(())
    }

    fn decode_payload(code: i32, reader: &mut BufferReader) -> Result<Self> {
        Ok(match code {
            Self::LISTENING => Self::Listening,
            Self::CONNECTED => Self::Connected,
            Self::HELLO => {
                let port = reader.get_i32()?;
                let internal_port =
                    u16::try_from(port).map_err(|_| ProtocolError::InvalidAddress(port.to_string()))?;
                Self::Hello { internal_port }
            },
            Self::TIME_AND_CRC => Self::TimeAndCrc(ConsistencyReport::decode(reader)?),
            other => return Err(ProtocolError::UnknownControlCode(other)),
        })
    }
}
