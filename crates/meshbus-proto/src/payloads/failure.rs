//! Host failure notices and agreement updates.

use crate::{
    codec::{BufferReader, BufferWriter},
    errors::Result,
    ids::{HostId, SiteId},
    message::WireMessage,
    subject::Subject,
    tags::MessageTag,
};

/// Tells local sites that a host is gone.
///
/// Delivered ahead of ordinary traffic so sites stop waiting on the failed
/// host before they process anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFailureNotice {
    /// Host that failed
    pub failed_host: HostId,
    /// Host that noticed the failure
    pub detected_by: HostId,
    /// Whether the failed host may come back through rejoin
    pub rejoinable: bool,
}

impl WireMessage for HostFailureNotice {
    const TAG: MessageTag = MessageTag::HostFailureNotice;

    fn subject(&self) -> Subject {
        Subject::Failure
    }

    fn encode(&self, writer: &mut BufferWriter) -> Result<()> {
        writer.put_i32(self.failed_host.0);
        writer.put_i32(self.detected_by.0);
        writer.put_bool(self.rejoinable);
        Ok(())
    }

    fn decode(reader: &mut BufferReader) -> Result<Self> {
        Ok(Self {
            failed_host: HostId(reader.get_i32()?),
            detected_by: HostId(reader.get_i32()?),
            rejoinable: reader.get_bool()?,
        })
    }
}

/// Exchanged by surviving sites after a host failure so they agree on the
/// last safe and committed transaction of the failed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureSiteUpdate {
    /// Host that failed
    pub failed_host: HostId,
    /// Site initiating the update
    pub initiator: SiteId,
    /// Highest safe transaction id observed from the failed host
    pub safe_txn_id: i64,
    /// Highest committed transaction id observed from the failed host
    pub committed_txn_id: i64,
}

impl WireMessage for FailureSiteUpdate {
    const TAG: MessageTag = MessageTag::FailureSiteUpdate;

    fn subject(&self) -> Subject {
        Subject::FailureSiteUpdate
    }

    fn encode(&self, writer: &mut BufferWriter) -> Result<()> {
        writer.put_i32(self.failed_host.0);
        writer.put_i32(self.initiator.0);
        writer.put_i64(self.safe_txn_id);
        writer.put_i64(self.committed_txn_id);
        Ok(())
    }

    fn decode(reader: &mut BufferReader) -> Result<Self> {
        Ok(Self {
            failed_host: HostId(reader.get_i32()?),
            initiator: SiteId(reader.get_i32()?),
            safe_txn_id: reader.get_i64()?,
            committed_txn_id: reader.get_i64()?,
        })
    }
}
