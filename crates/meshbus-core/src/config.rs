//! Messenger and cluster configuration.

use std::{net::SocketAddr, time::Duration};

use meshbus_proto::{ConsistencyReport, HostId};
use serde::{Deserialize, Serialize};

/// Default bootstrap port the coordinator listens on.
pub const DEFAULT_BOOTSTRAP_PORT: u16 = 3021;

/// Transport and bootstrap tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Silence after which the next send to a host raises a fault
    pub dead_host_timeout: Duration,
    /// Port the bootstrap coordinator listens on
    pub bootstrap_port: u16,
    /// Port each host accepts peer mesh connections on
    pub internal_port: u16,
    /// Largest acceptable max-min wall clock spread across the cluster
    pub max_clock_skew: Duration,
    /// Delay between attempts to reach the coordinator
    pub connect_retry_interval: Duration,
    /// Attempts to reach the coordinator before giving up
    pub connect_attempts: u32,
    /// How long a rejoining host waits for every live member to connect
    pub rejoin_timeout: Duration,
    /// Largest accepted inbound frame, bytes after the length field
    pub max_frame_size: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            dead_host_timeout: Duration::from_secs(90),
            bootstrap_port: DEFAULT_BOOTSTRAP_PORT,
            internal_port: DEFAULT_BOOTSTRAP_PORT + 1,
            max_clock_skew: Duration::from_millis(100),
            connect_retry_interval: Duration::from_millis(250),
            connect_attempts: 120,
            rejoin_timeout: Duration::from_secs(30),
            max_frame_size: 50 * 1024 * 1024,
        }
    }
}

/// Values a host must agree on with the rest of the cluster.
///
/// Supplied by the embedder from its loaded catalog and deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterIdentity {
    /// Catalog checksum
    pub catalog_crc: i64,
    /// Deployment checksum
    pub deployment_crc: i64,
    /// Catalog version
    pub catalog_version: i32,
    /// Transaction that produced the catalog
    pub catalog_txn_id: i64,
    /// Whether the cluster restore has already run
    pub restore_done: bool,
}

impl ClusterIdentity {
    /// Snapshot these values for the consistency check.
    pub fn report(&self, host: HostId, wall_clock_ms: i64) -> ConsistencyReport {
        ConsistencyReport {
            host,
            wall_clock_ms,
            catalog_crc: self.catalog_crc,
            deployment_crc: self.deployment_crc,
            catalog_version: self.catalog_version,
            catalog_txn_id: self.catalog_txn_id,
        }
    }
}

/// Parameters of one mesh formation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinConfig {
    /// Total number of hosts, coordinator included
    pub expected_hosts: usize,
    /// Where the coordinator accepts followers
    pub coordinator: SocketAddr,
    /// Where this host accepts peer connections
    pub listen: SocketAddr,
    /// First global transaction id of the new cluster (coordinator only)
    pub initial_txn_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MessengerConfig::default();
        assert_eq!(config.dead_host_timeout, Duration::from_secs(90));
        assert_eq!(config.bootstrap_port, 3021);
        assert_eq!(config.max_clock_skew, Duration::from_millis(100));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: MessengerConfig =
            serde_json::from_str(r#"{"bootstrap_port": 4000}"#).unwrap();
        assert_eq!(config.bootstrap_port, 4000);
        assert_eq!(config.internal_port, MessengerConfig::default().internal_port);
    }

    #[test]
    fn serialized_defaults() {
        insta::assert_snapshot!(
            serde_json::to_string(&MessengerConfig::default()).unwrap(),
            @r#"{"dead_host_timeout":{"secs":90,"nanos":0},"bootstrap_port":3021,"internal_port":3022,"max_clock_skew":{"secs":0,"nanos":100000000},"connect_retry_interval":{"secs":0,"nanos":250000000},"connect_attempts":120,"rejoin_timeout":{"secs":30,"nanos":0},"max_frame_size":52428800}"#
        );
    }

    #[test]
    fn report_carries_identity() {
        let identity = ClusterIdentity { catalog_crc: 7, deployment_crc: 9, ..Default::default() };
        let report = identity.report(HostId(3), 1000);
        assert_eq!(report.host, HostId(3));
        assert_eq!(report.catalog_crc, 7);
        assert_eq!(report.deployment_crc, 9);
        assert_eq!(report.wall_clock_ms, 1000);
    }
}
