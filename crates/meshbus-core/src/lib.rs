//! Sans-IO core of the meshbus cluster messaging substrate.
//!
//! Everything here is deterministic and free of sockets. Mesh formation and
//! rejoin are state machines that consume control messages and return actions
//! for a driver to execute; host liveness is a pure function of timestamps the
//! caller supplies; local delivery is a set of in-memory mailboxes.
//!
//! # Components
//!
//! - [`join`]: coordinator, follower and rejoin state machines
//! - [`checks`]: cluster consistency evaluation (clock skew, checksums, host
//!   set)
//! - [`liveness`]: detection-on-send dead host tracking
//! - [`mailbox`]: subject-prioritized site mailboxes, callback mailboxes and
//!   the registry that routes to them
//! - [`fault`]: node failure notifications raised to the embedder
//! - [`mod@env`]: time abstraction
//! - [`network`]: stream-oriented network abstraction
//! - [`config`]: messenger and cluster configuration
//! - [`error`]: error types

pub mod checks;
pub mod config;
pub mod env;
pub mod error;
pub mod fault;
pub mod join;
pub mod liveness;
pub mod mailbox;
pub mod network;

pub use config::{ClusterIdentity, JoinConfig, MessengerConfig};
pub use env::{Environment, SystemEnv};
pub use error::{JoinError, MailboxError};
pub use fault::{FaultCause, FaultHandler, NodeFault};
pub use liveness::{HostLiveness, HostState, SendVerdict};
pub use mailbox::{LocalMailbox, Mailbox, MailboxRegistry, SiteMailbox};
pub use meshbus_proto::{HostId, HsId, MailboxId, SiteId};
pub use network::{BoxStream, ByteStream, Listener, Network};
