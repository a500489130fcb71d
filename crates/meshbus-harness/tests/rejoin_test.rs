//! Replacing a failed host.
//!
//! `node2` crashes after the mesh forms. The survivors report it, close its
//! connection, and admit `node3` under the failed host's id. Messages then
//! flow both ways between the survivors and the replacement.
//!
//! A replacement that disagrees with the members is turned away without
//! disturbing the running hosts.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use meshbus_core::{ClusterIdentity, HostId, MailboxId, MailboxRegistry, join::JoinOutcome};
use meshbus_harness::{
    SimHost, SimNetwork, cluster::INTERNAL_PORT, node_addr, node_name, simulation,
};
use meshbus_proto::{InstanceId, JoinFailure, Message, payloads::Heartbeat};
use meshbus_transport::{BootstrapError, TransportError};
use parking_lot::Mutex;
use tokio::sync::mpsc;

const MAILBOX: MailboxId = MailboxId(11);
const BEAT: Duration = Duration::from_millis(200);

#[derive(Default)]
struct Shared {
    ready: AtomicUsize,
    ids: Mutex<BTreeMap<usize, HostId>>,
    instances: Mutex<BTreeMap<usize, InstanceId>>,
    rejoined: Mutex<Option<JoinOutcome>>,
    replies: Mutex<BTreeMap<usize, Message>>,
    victim_faults: Mutex<BTreeMap<usize, usize>>,
}

fn inbox(registry: &MailboxRegistry, host: HostId) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    registry
        .register_local_mailbox(host.site(0), MAILBOX, move |message| {
            let _ = tx.send(message);
        })
        .ok();
    rx
}

fn ping(from: HostId) -> Message {
    Heartbeat { txn_id: i64::from(from.0), last_safe_txn_id: 0 }.into()
}

async fn member(index: usize, shared: Arc<Shared>) -> turmoil::Result {
    let host = SimHost::new(index, 3);
    let mesh = host.form().await?;
    let local = mesh.host();
    let registry = Arc::new(MailboxRegistry::new());
    let mut replies = inbox(&registry, local);
    let started = host.start_with_registry(mesh, registry)?;
    let messenger = started.messenger;

    shared.ids.lock().insert(index, local);
    shared.instances.lock().insert(index, messenger.instance().clone());
    messenger.wait_for_all_ready().await;
    shared.ready.fetch_add(1, Ordering::SeqCst);

    let victim = loop {
        if let Some(&victim) = shared.ids.lock().get(&2) {
            break victim;
        }
        tokio::time::sleep(BEAT).await;
    };

    // Keep sending so a silent failure is caught by the dead-host timeout.
    while started.faults.faults_for(victim).is_empty() {
        tokio::time::sleep(BEAT).await;
        messenger.send(victim.site(0), MAILBOX, ping(local))?;
    }
    assert!(messenger.close_host(victim));

    messenger.prepare_rejoin(&SimNetwork, victim, node_addr(3, INTERNAL_PORT)).await?;
    messenger.commit_rejoin(victim)?;
    messenger.wait_for_all_ready().await;
    assert!(messenger.is_up(victim));

    messenger.send(victim.site(0), MAILBOX, ping(local))?;
    let reply = replies.recv().await.ok_or("inbox closed")?;
    shared.replies.lock().insert(index, reply);
    shared.victim_faults.lock().insert(index, started.faults.faults_for(victim).len());
    Ok(())
}

async fn doomed(shared: Arc<Shared>) -> turmoil::Result {
    let host = SimHost::new(2, 3);
    let started = host.start(host.form().await?)?;
    let messenger = started.messenger;
    shared.ids.lock().insert(2, messenger.local_host());
    messenger.wait_for_all_ready().await;
    shared.ready.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::time::sleep(BEAT).await;
        for peer in messenger.live_hosts() {
            messenger.send(peer.site(0), MAILBOX, ping(messenger.local_host()))?;
        }
    }
}

/// Answer every ping with the replacement's own id.
async fn replacement(shared: Arc<Shared>) -> turmoil::Result {
    let host = SimHost::new(3, 3);
    let mesh = host.rejoin().await?;
    let local = mesh.host();
    *shared.rejoined.lock() = Some(mesh.outcome.clone());

    let registry = Arc::new(MailboxRegistry::new());
    let mut pings = inbox(&registry, local);
    let started = host.start_with_registry(mesh, registry)?;
    let messenger = started.messenger;

    while let Some(message) = pings.recv().await {
        let Message::Heartbeat(beat) = message else {
            continue;
        };
        let from = HostId(i32::try_from(beat.txn_id)?);
        messenger.send(from.site(0), MAILBOX, ping(local))?;
    }
    Ok(())
}

#[test]
fn failed_host_is_replaced() {
    let shared = Arc::new(Shared::default());
    let mut sim = simulation();

    for index in 0..2 {
        sim.client(node_name(index), member(index, Arc::clone(&shared)));
    }
    let victim = Arc::clone(&shared);
    sim.host(node_name(2), move || doomed(Arc::clone(&victim)));
    let rejoiner = Arc::clone(&shared);
    sim.host(node_name(3), move || replacement(Arc::clone(&rejoiner)));

    while shared.ready.load(Ordering::SeqCst) < 3 {
        sim.step().unwrap();
    }
    sim.crash(node_name(2));
    sim.run().unwrap();

    let victim = shared.ids.lock()[&2];
    let rejoined = shared.rejoined.lock().clone().expect("replacement admitted");
    assert_eq!(rejoined.host, victim);
    assert_eq!(rejoined.instance, shared.instances.lock()[&0]);
    assert_eq!(rejoined.peers.len(), 2);

    let replies = shared.replies.lock();
    assert_eq!(replies.len(), 2);
    assert!(replies.values().all(|reply| *reply == ping(victim)));
    assert!(shared.victim_faults.lock().values().all(|&count| count == 1));
}

#[derive(Default)]
struct Refusal {
    refused: Mutex<BTreeMap<usize, Option<JoinFailure>>>,
    live: Mutex<BTreeMap<usize, (Vec<HostId>, Vec<HostId>, usize)>>,
    delivered: AtomicUsize,
    rejoiner: Mutex<Option<Result<(), JoinFailure>>>,
}

/// Offer `node2` a place in a two-host cluster, then keep talking to the
/// other member.
async fn refusing_member(index: usize, shared: Arc<Refusal>) -> turmoil::Result {
    let host = SimHost::new(index, 2);
    let mesh = host.form().await?;
    let local = mesh.host();
    let registry = Arc::new(MailboxRegistry::new());
    let mut pings = inbox(&registry, local);
    let started = host.start_with_registry(mesh, registry)?;
    let messenger = started.messenger;
    messenger.wait_for_all_ready().await;

    let before = messenger.live_hosts();
    let failure =
        match messenger.prepare_rejoin(&SimNetwork, HostId(2), node_addr(2, INTERNAL_PORT)).await {
            Err(TransportError::RejoinRefused { failure, .. }) => Some(failure),
            Err(other) => return Err(other.into()),
            Ok(()) => None,
        };
    shared.refused.lock().insert(index, failure);
    let after = messenger.live_hosts();
    shared.live.lock().insert(index, (before, after, messenger.foreign_host_count()));

    let peer = HostId(1 - local.0);
    messenger.send(peer.site(0), MAILBOX, ping(local))?;
    let reply = pings.recv().await.ok_or("inbox closed")?;
    assert_eq!(reply, ping(peer));
    assert!(started.faults.faults().is_empty());
    shared.delivered.fetch_add(1, Ordering::SeqCst);

    // Stay connected until the other member has its reply.
    while shared.delivered.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(BEAT).await;
    }
    Ok(())
}

#[test]
fn mismatched_replacement_is_refused() {
    let shared = Arc::new(Refusal::default());
    let mut sim = simulation();

    let rejoiner = Arc::clone(&shared);
    sim.client(node_name(2), async move {
        let identity = ClusterIdentity { restore_done: true, ..ClusterIdentity::default() };
        let result = match SimHost::new(2, 2).with_identity(identity).rejoin().await {
            Ok(_) => Ok(()),
            Err(BootstrapError::Rejected(failure)) => Err(failure),
            Err(other) => return Err(other.into()),
        };
        *rejoiner.rejoiner.lock() = Some(result);
        Ok(())
    });
    for index in 0..2 {
        sim.client(node_name(index), refusing_member(index, Arc::clone(&shared)));
    }
    sim.run().unwrap();

    assert_eq!(*shared.rejoiner.lock(), Some(Err(JoinFailure::FAULT_MISMATCH)));
    let refused = shared.refused.lock();
    assert_eq!(refused.len(), 2);
    assert!(refused.values().all(|f| *f == Some(JoinFailure::FAULT_MISMATCH)));
    for (index, (before, after, count)) in shared.live.lock().iter() {
        assert_eq!(before, after, "node{index} live table changed");
        assert_eq!(*count, 1);
        assert!(!after.contains(&HostId(2)));
    }
    assert_eq!(shared.delivered.load(Ordering::SeqCst), 2);
}
