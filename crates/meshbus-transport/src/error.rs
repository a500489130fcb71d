//! Transport error types.

use std::{io, net::SocketAddr};

use meshbus_core::{HostId, JoinError};
use meshbus_proto::{JoinFailure, ProtocolError};
use thiserror::Error;

/// Failure reading or writing one frame on a connection.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Socket failure
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Bytes on the wire did not parse
    #[error("malformed frame: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Mesh formation or rejoin admission failed. The process should exit.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Listener or connect failure
    #[error("bootstrap I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Control stream failure
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Peer drove the join state machine out of order
    #[error(transparent)]
    Join(#[from] JoinError),

    /// Consistency checks failed somewhere in the cluster
    #[error("cluster rejected the join: {0:?}")]
    Rejected(JoinFailure),

    /// The coordinator never accepted a connection
    #[error("coordinator {addr} unreachable after {attempts} attempts")]
    Unreachable {
        /// Coordinator address
        addr: SocketAddr,
        /// Connection attempts made
        attempts: u32,
    },

    /// A follower opened with something other than HELLO
    #[error("expected HELLO from {addr}")]
    MissingHello {
        /// Follower address
        addr: SocketAddr,
    },
}

/// Steady-state messenger failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket failure
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Control stream failure
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Encoding an outbound frame failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No connection to the host
    #[error("{0} is not connected")]
    UnknownHost(HostId),

    /// A rejoin is already staged
    #[error("rejoin of {0} already in progress")]
    RejoinInProgress(HostId),

    /// Commit or rollback named a host with no staged rejoin
    #[error("no rejoin staged for {0}")]
    NoPendingRejoin(HostId),

    /// The rejoining host answered JOINFAIL
    #[error("{host} refused the rejoin: {failure:?}")]
    RejoinRefused {
        /// Rejoining host
        host: HostId,
        /// Failed checks
        failure: JoinFailure,
    },

    /// The rejoining host answered something other than COMPLETE or JOINFAIL
    #[error("unexpected answer to rejoin request (code {0})")]
    UnexpectedReply(i32),

    /// The messenger was shut down
    #[error("messenger is shut down")]
    Shutdown,
}
