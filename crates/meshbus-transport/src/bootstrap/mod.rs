//! Drivers that run the join state machines over a [`Network`].
//!
//! Each driver binds, connects, and shuttles control messages for its role
//! until the machine reports `Finished`. Success yields a [`Mesh`] of open
//! connections keyed by peer host; failure is returned and the process is
//! expected to exit.
//!
//! [`Network`]: meshbus_core::Network

mod coordinator;
mod follower;
mod rejoin;

use std::collections::BTreeMap;

pub use coordinator::run_coordinator;
pub use follower::run_follower;
use meshbus_core::{BoxStream, ByteStream, HostId, join::JoinOutcome};
pub use rejoin::run_rejoin;

/// A formed mesh, ready to hand to a
/// [`HostMessenger`](crate::HostMessenger).
pub struct Mesh {
    /// Assigned host id, cluster instance and initial transaction id
    pub outcome: JoinOutcome,
    /// One connection to every other host
    pub peers: BTreeMap<HostId, BoxStream>,
}

impl Mesh {
    fn new<S: ByteStream>(outcome: JoinOutcome, peers: BTreeMap<HostId, S>) -> Self {
        let peers =
            peers.into_iter().map(|(host, stream)| (host, Box::new(stream) as BoxStream)).collect();
        Self { outcome, peers }
    }

    /// This host's id.
    pub fn host(&self) -> HostId {
        self.outcome.host
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("outcome", &self.outcome)
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .finish()
    }
}
