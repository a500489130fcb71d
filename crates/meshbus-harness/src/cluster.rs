//! Per-host setup for simulated clusters.
//!
//! Hosts are named `node0`, `node1`, ... and `node0` always coordinates
//! bootstrap. Address lookups go through Turmoil, so the helpers here must be
//! called from inside a simulated host or client.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use meshbus_core::{
    ClusterIdentity, FaultHandler, JoinConfig, MailboxRegistry, MessengerConfig,
    config::DEFAULT_BOOTSTRAP_PORT,
};
use meshbus_transport::{
    BootstrapError, HostMessenger, Mesh, MessengerParts, TransportError, run_coordinator,
    run_follower, run_rejoin,
};

use crate::{RecordingFaults, SimEnv, SimNetwork};

/// Port every simulated host accepts peer connections on.
pub const INTERNAL_PORT: u16 = 3022;

/// Simulation with near-zero link latency, so clock samples taken while the
/// consistency check is in flight stay well inside the skew bound.
pub fn simulation() -> turmoil::Sim<'static> {
    turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .max_message_latency(Duration::from_millis(1))
        .build()
}

/// Turmoil host name of host `index`.
pub fn node_name(index: usize) -> String {
    format!("node{index}")
}

/// Address of `node{index}` on `port`.
pub fn node_addr(index: usize, port: u16) -> SocketAddr {
    SocketAddr::new(turmoil::lookup(node_name(index)), port)
}

/// One simulated cluster member and its settings.
#[derive(Debug, Clone)]
pub struct SimHost {
    /// Position in the cluster; 0 coordinates
    pub index: usize,
    /// Cluster size
    pub hosts: usize,
    /// Values compared during the consistency check
    pub identity: ClusterIdentity,
    /// Messenger tuning
    pub config: MessengerConfig,
    /// Wall clock skew applied to this host
    pub skew_ms: i64,
}

/// A host with a running messenger.
pub struct Started {
    /// The messenger
    pub messenger: HostMessenger<SimEnv>,
    /// Faults it reported
    pub faults: Arc<RecordingFaults>,
}

impl SimHost {
    /// Host `index` of a `hosts`-host cluster with short simulation timeouts.
    pub fn new(index: usize, hosts: usize) -> Self {
        let config = MessengerConfig {
            dead_host_timeout: Duration::from_secs(2),
            connect_retry_interval: Duration::from_millis(50),
            rejoin_timeout: Duration::from_secs(20),
            ..MessengerConfig::default()
        };
        Self { index, hosts, identity: ClusterIdentity::default(), config, skew_ms: 0 }
    }

    /// Replace the consistency values.
    pub fn with_identity(mut self, identity: ClusterIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Skew this host's wall clock.
    pub fn with_skew(mut self, skew_ms: i64) -> Self {
        self.skew_ms = skew_ms;
        self
    }

    /// Replace the messenger tuning.
    pub fn with_config(mut self, config: MessengerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bootstrap addresses for this host.
    pub fn join_config(&self) -> JoinConfig {
        JoinConfig {
            expected_hosts: self.hosts,
            coordinator: node_addr(0, DEFAULT_BOOTSTRAP_PORT),
            listen: node_addr(self.index, INTERNAL_PORT),
            initial_txn_id: 1_000,
        }
    }

    /// Clock for this host.
    pub fn env(&self) -> SimEnv {
        SimEnv::with_skew(self.skew_ms)
    }

    /// Run bootstrap as coordinator or follower.
    pub async fn form(&self) -> Result<Mesh, BootstrapError> {
        let join = self.join_config();
        if self.index == 0 {
            run_coordinator(&SimNetwork, &self.env(), &join, &self.config, self.identity).await
        } else {
            run_follower(&SimNetwork, &self.env(), &join, &self.config, self.identity).await
        }
    }

    /// Wait for the live members to admit this host as a replacement.
    pub async fn rejoin(&self) -> Result<Mesh, BootstrapError> {
        let listen = node_addr(self.index, INTERNAL_PORT);
        run_rejoin(&SimNetwork, &self.env(), listen, &self.config, self.identity).await
    }

    /// Start a messenger on a formed mesh.
    pub fn start(&self, mesh: Mesh) -> Result<Started, TransportError> {
        self.start_with_registry(mesh, Arc::new(MailboxRegistry::new()))
    }

    /// Start a messenger whose mailboxes were registered in advance, so
    /// nothing a peer sends after the ready exchange is dropped.
    pub fn start_with_registry(
        &self,
        mesh: Mesh,
        registry: Arc<MailboxRegistry>,
    ) -> Result<Started, TransportError> {
        let faults = Arc::new(RecordingFaults::new());
        let parts = MessengerParts {
            config: self.config.clone(),
            env: self.env(),
            identity: self.identity,
            registry,
            faults: Arc::clone(&faults) as Arc<dyn FaultHandler>,
        };
        let messenger = HostMessenger::start(mesh, parts)?;
        Ok(Started { messenger, faults })
    }
}
