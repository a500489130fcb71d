//! Bootstrap consistency gate.
//!
//! One host disagrees with the others; every host, including the ones that
//! agree, must see the same JOINFAIL bits and exit bootstrap with an error.

use std::{collections::BTreeMap, sync::Arc};

use meshbus_core::ClusterIdentity;
use meshbus_harness::{SimHost, node_name, simulation};
use meshbus_proto::JoinFailure;
use meshbus_transport::BootstrapError;
use parking_lot::Mutex;

type Results = Arc<Mutex<BTreeMap<usize, Result<(), JoinFailure>>>>;

fn run(hosts: Vec<SimHost>) -> BTreeMap<usize, Result<(), JoinFailure>> {
    let results: Results = Arc::default();
    let mut sim = simulation();

    for host in hosts {
        let results = Arc::clone(&results);
        sim.client(node_name(host.index), async move {
            let result = match host.form().await {
                Ok(_) => Ok(()),
                Err(BootstrapError::Rejected(failure)) => Err(failure),
                Err(other) => return Err(other.into()),
            };
            results.lock().insert(host.index, result);
            Ok(())
        });
    }
    sim.run().unwrap();

    let results = results.lock().clone();
    results
}

fn cluster(size: usize) -> Vec<SimHost> {
    (0..size).map(|index| SimHost::new(index, size)).collect()
}

fn agreed() -> ClusterIdentity {
    ClusterIdentity {
        catalog_crc: 0xc0ffee,
        deployment_crc: 0xd00d,
        catalog_version: 4,
        catalog_txn_id: 99,
        restore_done: false,
    }
}

#[test]
fn matching_hosts_pass() {
    let hosts = cluster(3).into_iter().map(|h| h.with_identity(agreed())).collect();
    let results = run(hosts);
    assert_eq!(results.len(), 3);
    assert!(results.values().all(Result::is_ok));
}

#[test]
fn catalog_crc_mismatch_fails_everywhere() {
    let mut hosts: Vec<SimHost> = cluster(3).into_iter().map(|h| h.with_identity(agreed())).collect();
    hosts[2].identity.catalog_crc = 1;

    let results = run(hosts);
    assert_eq!(results.len(), 3);
    for result in results.values() {
        assert_eq!(*result, Err(JoinFailure::CRC));
    }
}

#[test]
fn deployment_and_version_mismatch_combine() {
    let mut hosts: Vec<SimHost> = cluster(3).into_iter().map(|h| h.with_identity(agreed())).collect();
    hosts[1].identity.deployment_crc = 7;
    hosts[1].identity.catalog_version = 5;

    let results = run(hosts);
    for result in results.values() {
        assert_eq!(*result, Err(JoinFailure::DEPCRC | JoinFailure::CATVER));
    }
}

#[test]
fn skewed_clock_fails_with_ntp() {
    let mut hosts = cluster(3);
    hosts[2] = hosts[2].clone().with_skew(1_000);

    let results = run(hosts);
    for result in results.values() {
        assert_eq!(*result, Err(JoinFailure::NTP));
    }
}

#[test]
fn skew_within_bound_passes() {
    let mut hosts = cluster(3);
    hosts[1] = hosts[1].clone().with_skew(40);
    hosts[2] = hosts[2].clone().with_skew(-40);

    let results = run(hosts);
    assert!(results.values().all(Result::is_ok));
}
