//! One-byte message type tags.

/// Type tag written immediately before every message body.
///
/// Tags are dense starting at 1 so the dispatch table can index by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    /// Transaction heartbeat from an initiator
    Heartbeat = 1,
    /// Site's reply to a heartbeat
    HeartbeatResponse = 2,
    /// Failure agreement update
    FailureSiteUpdate = 3,
    /// Opaque metadata plus payload
    BinaryPayload = 4,
    /// Generic acknowledgement
    Acknowledgement = 5,
    /// Notice that a host left the cluster
    HostFailureNotice = 6,
}

impl MessageTag {
    /// Every tag in wire order.
    pub const ALL: [Self; 6] = [
        Self::Heartbeat,
        Self::HeartbeatResponse,
        Self::FailureSiteUpdate,
        Self::BinaryPayload,
        Self::Acknowledgement,
        Self::HostFailureNotice,
    ];

    /// Wire value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.to_u8() == value)
    }
}
