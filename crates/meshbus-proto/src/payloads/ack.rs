//! Generic acknowledgement.

use crate::{
    codec::{BufferReader, BufferWriter},
    errors::Result,
    ids::SiteId,
    message::WireMessage,
    tags::MessageTag,
};

/// Acknowledges a transaction on behalf of one or more sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Transaction being acknowledged
    pub txn_id: i64,
    /// Acknowledging site
    pub source: SiteId,
    /// Optional human-readable status
    pub status: Option<String>,
    /// Sites covered by this acknowledgement
    pub sites: Vec<SiteId>,
}

impl WireMessage for Acknowledgement {
    const TAG: MessageTag = MessageTag::Acknowledgement;

    fn encode(&self, writer: &mut BufferWriter) -> Result<()> {
        writer.put_i64(self.txn_id);
        writer.put_i32(self.source.0);
        writer.put_string(self.status.as_deref())?;
        let sites: Vec<i32> = self.sites.iter().map(|site| site.0).collect();
        writer.put_i32_array(&sites)
    }

    fn decode(reader: &mut BufferReader) -> Result<Self> {
        Ok(Self {
            txn_id: reader.get_i64()?,
            source: SiteId(reader.get_i32()?),
            status: reader.get_string()?,
            sites: reader.get_i32_array()?.into_iter().map(SiteId).collect(),
        })
    }
}
