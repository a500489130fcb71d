//! Deterministic simulation harness for meshbus clusters.
//!
//! Turmoil-based implementations of the [`Environment`] and [`Network`] traits
//! so whole clusters (bootstrap, messaging, host failure, rejoin) run in one
//! process on virtual time.
//!
//! [`Environment`]: meshbus_core::Environment
//! [`Network`]: meshbus_core::Network

pub mod cluster;
pub mod faults;
pub mod sim_env;
pub mod sim_network;

pub use cluster::{SimHost, Started, node_addr, node_name, simulation};
pub use faults::RecordingFaults;
pub use sim_env::SimEnv;
pub use sim_network::{SimListener, SimNetwork};
