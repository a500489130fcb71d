//! Heartbeat traffic between initiators and execution sites.
//!
//! Heartbeats double as the liveness traffic that keeps a connection's
//! last-seen timestamp fresh while no transactions are flowing.

use crate::{
    codec::{BufferReader, BufferWriter},
    errors::Result,
    ids::SiteId,
    message::WireMessage,
    tags::MessageTag,
};

/// Initiator heartbeat carrying its latest and safe transaction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Most recent transaction id issued by the initiator
    pub txn_id: i64,
    /// Highest transaction id known to be safe everywhere
    pub last_safe_txn_id: i64,
}

impl WireMessage for Heartbeat {
    const TAG: MessageTag = MessageTag::Heartbeat;

    fn encode(&self, writer: &mut BufferWriter) -> Result<()> {
        writer.put_i64(self.txn_id);
        writer.put_i64(self.last_safe_txn_id);
        Ok(())
    }

    fn decode(reader: &mut BufferReader) -> Result<Self> {
        Ok(Self { txn_id: reader.get_i64()?, last_safe_txn_id: reader.get_i64()? })
    }
}

/// Execution site's reply to a [`Heartbeat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatResponse {
    /// Replying site
    pub exec_site: SiteId,
    /// Last transaction id the site has received
    pub last_received_txn_id: i64,
    /// Whether the site is blocked waiting on other work
    pub blocked: bool,
}

impl WireMessage for HeartbeatResponse {
    const TAG: MessageTag = MessageTag::HeartbeatResponse;

    fn encode(&self, writer: &mut BufferWriter) -> Result<()> {
        writer.put_i32(self.exec_site.0);
        writer.put_i64(self.last_received_txn_id);
        writer.put_bool(self.blocked);
        Ok(())
    }

    fn decode(reader: &mut BufferReader) -> Result<Self> {
        Ok(Self {
            exec_site: SiteId(reader.get_i32()?),
            last_received_txn_id: reader.get_i64()?,
            blocked: reader.get_bool()?,
        })
    }
}
