//! Tokio transport for the meshbus host mesh.
//!
//! Drives the sans-IO join machines from `meshbus-core` over real sockets and
//! runs the steady-state [`HostMessenger`] on the connections they produce.
//!
//! # Components
//!
//! - [`bootstrap`]: coordinator, follower and rejoin drivers producing a
//!   [`Mesh`]
//! - [`HostMessenger`]: per-host reader and writer tasks, fan-out sends,
//!   control frames and the rejoin handshake on the member side
//! - [`TcpNetwork`]: the production [`Network`](meshbus_core::Network)

pub mod bootstrap;
mod error;
mod io;
mod messenger;
mod tcp;

pub use bootstrap::{Mesh, run_coordinator, run_follower, run_rejoin};
pub use error::{BootstrapError, FrameError, TransportError};
pub use io::{read_control, read_frame, read_host_id, write_control, write_host_id};
pub use messenger::{HostMessenger, MessengerParts};
pub use tcp::{TcpListenerHandle, TcpNetwork};
