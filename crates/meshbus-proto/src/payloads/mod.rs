//! Concrete message payloads.
//!
//! Business payloads (fragment plans, snapshot metadata and so on) belong to
//! the embedding database. The types here are the ones the messaging layer
//! itself exchanges, plus an opaque [`BinaryPayload`] carrier.

mod ack;
mod binary;
mod failure;
mod heartbeat;

pub use ack::Acknowledgement;
pub use binary::BinaryPayload;
pub use failure::{FailureSiteUpdate, HostFailureNotice};
pub use heartbeat::{Heartbeat, HeartbeatResponse};
