//! Node failure notifications.
//!
//! The transport never recovers from a failed host on its own. It reports the
//! failure once through [`FaultHandler::host_failed`] and leaves recovery
//! (typically a rejoin of a replacement host) to the embedder. Conditions that
//! must end the process, such as a poison pill or an undecodable frame from a
//! peer, go to [`FaultHandler::crash`].

use std::{fmt, time::Duration};

use meshbus_proto::HostId;

/// Why a host was declared failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCause {
    /// Nothing received for longer than the dead-host timeout
    DeadHostTimeout {
        /// Observed silence
        silence: Duration,
    },
    /// Connection closed by the peer or failed on read or write
    ConnectionLost,
    /// Closed locally by the embedder
    Closed,
}

/// A node failure observed by one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFault {
    /// Host declared failed
    pub failed: HostId,
    /// Host that noticed
    pub detected_by: HostId,
    /// Cause
    pub cause: FaultCause,
}

impl fmt::Display for NodeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            FaultCause::DeadHostTimeout { silence } => write!(
                f,
                "host {} declared dead by host {} after {silence:?} of silence",
                self.failed, self.detected_by
            ),
            FaultCause::ConnectionLost => {
                write!(f, "host {} lost connection to host {}", self.detected_by, self.failed)
            },
            FaultCause::Closed => {
                write!(f, "host {} closed connection to host {}", self.detected_by, self.failed)
            },
        }
    }
}

/// Receives failure notifications. Implemented by the embedder.
pub trait FaultHandler: Send + Sync + 'static {
    /// A foreign host failed. Called at most once per host incarnation.
    fn host_failed(&self, fault: NodeFault);

    /// The local process must terminate. `reason` is the diagnostic to report.
    fn crash(&self, reason: &str);
}
