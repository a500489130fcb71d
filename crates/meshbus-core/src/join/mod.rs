//! Mesh formation and rejoin state machines.
//!
//! Each role is a sans-IO machine: the driver feeds it control messages and
//! connection events, and executes the actions it returns. All three share one
//! phase enum so errors and logs read the same across roles.
//!
//! ```text
//! coordinator: Unstarted -> Listening -> Accepting -> MeshBuilding -> ConsistencyCheck -> Complete
//! follower:    Unstarted -> Connecting -> PeerWiring -> ConsistencyCheck -> Complete
//! rejoin:      Unstarted -> Listening -> ConsistencyCheck -> Complete
//! ```
//!
//! Any phase may end in `Failed`. Bootstrap is all-or-nothing: there is no
//! retry edge out of `Failed`.

mod coordinator;
mod follower;
mod rejoin;

pub use coordinator::{CoordinatorAction, CoordinatorJoiner};
pub use follower::{FollowerAction, FollowerJoiner};
use meshbus_proto::{HostId, InstanceId};
pub use rejoin::{RejoinAction, RejoinJoiner, rejoin_request};

/// Phase of a join state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinPhase {
    /// Created, nothing done yet
    Unstarted,
    /// Bound and waiting for the first connection
    Listening,
    /// Coordinator admitting followers
    Accepting,
    /// Coordinator directing peer connections
    MeshBuilding,
    /// Follower waiting for its host id
    Connecting,
    /// Follower executing peer connection commands
    PeerWiring,
    /// Clocks and checksums being compared
    ConsistencyCheck,
    /// Joined the mesh
    Complete,
    /// Refused or aborted
    Failed,
}

impl JoinPhase {
    /// True once no further input is accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// What a host learns from a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// This host's id
    pub host: HostId,
    /// Cluster incarnation
    pub instance: InstanceId,
    /// Initial global transaction id
    pub initial_txn_id: i64,
    /// Every other host this host now has a connection to
    pub peers: Vec<HostId>,
}
