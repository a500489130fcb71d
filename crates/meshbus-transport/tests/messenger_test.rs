//! Host messenger tests over in-memory pipes.
//!
//! Meshes are assembled by hand from `tokio::io::duplex` pairs so each test
//! controls exactly which hosts exist and when connections break. The clock
//! is Tokio's, paused where a test needs to cross the dead-host timeout.

use std::{
    collections::{BTreeMap, VecDeque},
    io,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use meshbus_core::{
    BoxStream, ClusterIdentity, Environment, FaultCause, FaultHandler, HostId, Listener,
    MailboxId, MailboxRegistry, MessengerConfig, Network, NodeFault, SiteId, join::JoinOutcome,
};
use meshbus_proto::{
    CatalogUpdate, Command, InboundFrame, InstanceId, JoinFailure, Message,
    codec::MAX_FIELD_LEN,
    payloads::{BinaryPayload, Heartbeat},
};
use meshbus_transport::{
    HostMessenger, Mesh, MessengerParts, TransportError, read_control, read_frame, write_control,
};
use parking_lot::Mutex;
use tokio::{
    io::DuplexStream,
    sync::{Notify, mpsc, oneshot},
};

const MAILBOX: MailboxId = MailboxId(7);

#[derive(Clone, Default)]
struct TokioEnv;

impl Environment for TokioEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn wall_clock_millis(&self) -> i64 {
        0
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[derive(Default)]
struct RecordingFaults {
    faults: Mutex<Vec<NodeFault>>,
    crashes: Mutex<Vec<String>>,
    changed: Notify,
}

impl FaultHandler for RecordingFaults {
    fn host_failed(&self, fault: NodeFault) {
        self.faults.lock().push(fault);
        self.changed.notify_waiters();
    }

    fn crash(&self, reason: &str) {
        self.crashes.lock().push(reason.to_owned());
        self.changed.notify_waiters();
    }
}

impl RecordingFaults {
    async fn wait_until(&self, done: impl Fn(&Self) -> bool) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if done(self) {
                return;
            }
            changed.await;
        }
    }
}

struct Node {
    messenger: HostMessenger<TokioEnv>,
    faults: Arc<RecordingFaults>,
}

fn beat(txn_id: i64) -> Message {
    Heartbeat { txn_id, last_safe_txn_id: 0 }.into()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fully connected mesh of `hosts` hosts over duplex pipes.
fn mesh(hosts: i32, config: MessengerConfig) -> Vec<Node> {
    init_tracing();
    let mut peers: Vec<BTreeMap<HostId, BoxStream>> = (0..hosts).map(|_| BTreeMap::new()).collect();
    for a in 0..hosts {
        for b in (a + 1)..hosts {
            let (left, right) = tokio::io::duplex(64 * 1024);
            peers[a as usize].insert(HostId(b), Box::new(left));
            peers[b as usize].insert(HostId(a), Box::new(right));
        }
    }

    let instance = InstanceId { timestamp: 1, coordinator: "127.0.0.1:3021".into() };
    peers
        .into_iter()
        .enumerate()
        .map(|(index, peers)| {
            let host = HostId(index as i32);
            let outcome = JoinOutcome {
                host,
                instance: instance.clone(),
                initial_txn_id: 100,
                peers: peers.keys().copied().collect(),
            };
            let faults = Arc::new(RecordingFaults::default());
            let parts = MessengerParts {
                config: config.clone(),
                env: TokioEnv,
                identity: ClusterIdentity::default(),
                registry: Arc::new(MailboxRegistry::new()),
                faults: Arc::clone(&faults) as Arc<dyn FaultHandler>,
            };
            let messenger = HostMessenger::start(Mesh { outcome, peers }, parts).unwrap();
            Node { messenger, faults }
        })
        .collect()
}

fn channel_mailbox(node: &Node, site: SiteId) -> mpsc::UnboundedReceiver<(SiteId, Message)> {
    let (tx, rx) = mpsc::unbounded_channel();
    node.messenger
        .registry()
        .register_local_mailbox(site, MAILBOX, move |message| {
            let _ = tx.send((site, message));
        })
        .unwrap();
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<(SiteId, Message)>) -> (SiteId, Message) {
    tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn every_host_becomes_ready() {
    let nodes = mesh(3, MessengerConfig::default());
    for node in &nodes {
        node.messenger.wait_for_all_ready().await;
    }
    assert_eq!(
        nodes[0].messenger.ready_hosts().into_iter().collect::<Vec<_>>(),
        vec![HostId(1), HostId(2)]
    );
    assert_eq!(nodes[2].messenger.live_hosts(), vec![HostId(0), HostId(1)]);
}

#[tokio::test]
async fn fan_out_sends_one_frame_per_host() {
    let nodes = mesh(2, MessengerConfig::default());
    let mut local = channel_mailbox(&nodes[0], SiteId(1));
    let mut remote_a = channel_mailbox(&nodes[1], SiteId(101));
    let mut remote_b = channel_mailbox(&nodes[1], SiteId(102));

    let before = nodes[0].messenger.frames_sent_to(HostId(1));
    nodes[0]
        .messenger
        .send_many(&[SiteId(101), SiteId(1), SiteId(102), SiteId(101)], MAILBOX, beat(5))
        .unwrap();
    assert_eq!(nodes[0].messenger.frames_sent_to(HostId(1)), before + 1);

    assert_eq!(next(&mut local).await, (SiteId(1), beat(5)));
    assert_eq!(next(&mut remote_a).await, (SiteId(101), beat(5)));
    assert_eq!(next(&mut remote_b).await, (SiteId(102), beat(5)));
    assert!(remote_a.try_recv().is_err());
}

#[tokio::test]
async fn frames_to_one_host_arrive_in_send_order() {
    let nodes = mesh(2, MessengerConfig::default());
    let mut inbox = channel_mailbox(&nodes[1], SiteId(100));

    for txn in 0..200 {
        nodes[0].messenger.send(SiteId(100), MAILBOX, beat(txn)).unwrap();
    }
    for txn in 0..200 {
        assert_eq!(next(&mut inbox).await.1, beat(txn));
    }
}

#[tokio::test]
async fn catalog_keeps_newest_version() {
    let nodes = mesh(2, MessengerConfig::default());
    let mut inbox = channel_mailbox(&nodes[1], SiteId(100));

    let newer = CatalogUpdate { version: 3, txn_id: 30, catalog: Bytes::from_static(b"v3") };
    let older = CatalogUpdate { version: 2, txn_id: 20, catalog: Bytes::from_static(b"v2") };
    nodes[0].messenger.send_catalog(newer.clone()).unwrap();
    nodes[0].messenger.send_catalog(older).unwrap();
    nodes[0].messenger.send(SiteId(100), MAILBOX, beat(1)).unwrap();

    next(&mut inbox).await;
    assert_eq!(nodes[1].messenger.latest_catalog(), Some(newer.clone()));
    assert_eq!(nodes[0].messenger.latest_catalog(), Some(newer));
}

#[tokio::test]
async fn poison_pill_crashes_every_peer() {
    let nodes = mesh(3, MessengerConfig::default());
    nodes[0].messenger.send_poison("catalog diverged").unwrap();

    for node in &nodes[1..] {
        node.faults.wait_until(|f| !f.crashes.lock().is_empty()).await;
        assert_eq!(*node.faults.crashes.lock(), vec!["catalog diverged".to_owned()]);
    }
    assert!(nodes[0].faults.crashes.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_host_faults_once_on_send() {
    let config = MessengerConfig { dead_host_timeout: Duration::from_secs(1), ..Default::default() };
    let nodes = mesh(2, config);
    nodes[0].messenger.wait_for_all_ready().await;

    tokio::time::advance(Duration::from_secs(2)).await;
    nodes[0].messenger.send(SiteId(100), MAILBOX, beat(1)).unwrap();
    nodes[0].messenger.send(SiteId(100), MAILBOX, beat(2)).unwrap();

    let faults = nodes[0].faults.faults.lock().clone();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].failed, HostId(1));
    assert_eq!(faults[0].detected_by, HostId(0));
    assert!(matches!(
        faults[0].cause,
        FaultCause::DeadHostTimeout { silence } if silence >= Duration::from_secs(2)
    ));
    assert!(!nodes[0].messenger.is_up(HostId(1)));
    assert_eq!(nodes[0].messenger.live_hosts(), Vec::<HostId>::new());
}

#[tokio::test(start_paused = true)]
async fn inbound_traffic_keeps_host_alive() {
    let config = MessengerConfig { dead_host_timeout: Duration::from_secs(1), ..Default::default() };
    let nodes = mesh(2, config);
    let mut inbox = channel_mailbox(&nodes[0], SiteId(1));

    for txn in 0..5 {
        tokio::time::advance(Duration::from_millis(600)).await;
        nodes[1].messenger.send(SiteId(1), MAILBOX, beat(txn)).unwrap();
        next(&mut inbox).await;
        nodes[0].messenger.send(SiteId(100), MAILBOX, beat(txn)).unwrap();
    }
    assert!(nodes[0].faults.faults.lock().is_empty());
    assert!(nodes[0].messenger.is_up(HostId(1)));
}

#[tokio::test]
async fn lost_connection_faults_once() {
    let nodes = mesh(3, MessengerConfig::default());
    nodes[2].messenger.shutdown();

    for node in &nodes[..2] {
        node.faults.wait_until(|f| !f.faults.lock().is_empty()).await;
        let faults = node.faults.faults.lock().clone();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].failed, HostId(2));
        assert_eq!(faults[0].cause, FaultCause::ConnectionLost);
    }

    // Closing a host that already failed reports nothing new.
    assert!(nodes[0].messenger.close_host(HostId(2)));
    assert!(!nodes[0].messenger.close_host(HostId(2)));
    assert_eq!(nodes[0].faults.faults.lock().len(), 1);
    assert_eq!(nodes[0].messenger.foreign_host_count(), 1);
}

#[tokio::test]
async fn closing_a_live_host_reports_closed() {
    let nodes = mesh(2, MessengerConfig::default());
    assert!(nodes[0].messenger.close_host(HostId(1)));

    let faults = nodes[0].faults.faults.lock().clone();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].cause, FaultCause::Closed);
    assert!(!nodes[0].messenger.is_up(HostId(1)));
}

#[tokio::test]
async fn shutdown_refuses_sends() {
    let nodes = mesh(2, MessengerConfig::default());
    nodes[0].messenger.shutdown();
    nodes[0].messenger.shutdown();

    let err = nodes[0].messenger.send(SiteId(100), MAILBOX, beat(1)).unwrap_err();
    assert!(matches!(err, TransportError::Shutdown));
    assert_eq!(nodes[0].messenger.foreign_host_count(), 0);
}

#[tokio::test]
async fn rejoin_without_staged_connection_fails() {
    let nodes = mesh(2, MessengerConfig::default());
    assert!(matches!(
        nodes[0].messenger.commit_rejoin(HostId(1)),
        Err(TransportError::NoPendingRejoin(HostId(1)))
    ));
    assert!(nodes[0].messenger.rollback_rejoin(HostId(1)).is_err());
}

#[tokio::test]
async fn failed_encode_delivers_nowhere() {
    let nodes = mesh(2, MessengerConfig::default());
    let mut local = channel_mailbox(&nodes[0], SiteId(1));
    let oversized: Message = BinaryPayload {
        metadata: None,
        payload: Some(Bytes::from(vec![0; MAX_FIELD_LEN + 1])),
    }
    .into();

    let before = nodes[0].messenger.frames_sent_to(HostId(1));
    let err = nodes[0].messenger.send_many(&[SiteId(1), SiteId(101)], MAILBOX, oversized);
    assert!(matches!(err, Err(TransportError::Protocol(_))));
    assert!(local.try_recv().is_err());
    assert_eq!(nodes[0].messenger.frames_sent_to(HostId(1)), before);

    // Purely local sends never encode.
    nodes[0].messenger.send(SiteId(1), MAILBOX, beat(3)).unwrap();
    assert_eq!(next(&mut local).await, (SiteId(1), beat(3)));
}

/// Hands out pre-made pipe ends on connect.
#[derive(Default)]
struct PipeNetwork {
    streams: Mutex<VecDeque<DuplexStream>>,
    connects: Mutex<usize>,
}

impl PipeNetwork {
    /// Queue a connection and return the far end.
    fn offer(&self) -> DuplexStream {
        let (near, far) = tokio::io::duplex(64 * 1024);
        self.streams.lock().push_back(near);
        far
    }
}

struct NoListener;

#[async_trait]
impl Listener for NoListener {
    type Stream = DuplexStream;

    async fn accept(&self) -> io::Result<(DuplexStream, SocketAddr)> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Err(io::ErrorKind::Unsupported.into())
    }
}

#[async_trait]
impl Network for PipeNetwork {
    type Stream = DuplexStream;
    type Listener = NoListener;

    async fn bind(&self, _addr: SocketAddr) -> io::Result<NoListener> {
        Ok(NoListener)
    }

    async fn connect(&self, _addr: SocketAddr) -> io::Result<DuplexStream> {
        *self.connects.lock() += 1;
        self.streams.lock().pop_front().ok_or_else(|| io::ErrorKind::ConnectionRefused.into())
    }
}

const REPLACEMENT: HostId = HostId(2);

fn replacement_addr() -> SocketAddr {
    "10.0.0.3:3022".parse().unwrap()
}

/// Answer one rejoin request with `reply` once `go` fires.
async fn answer_rejoin(
    mut far: DuplexStream,
    reply: Command,
    go: oneshot::Receiver<()>,
) -> DuplexStream {
    let request: Command = read_control(&mut far, 1 << 20).await.unwrap();
    assert!(matches!(request, Command::RejoinRequest(ref r) if r.assigned == REPLACEMENT));
    go.await.unwrap();
    write_control(&mut far, &reply).await.unwrap();
    far
}

#[tokio::test]
async fn rolled_back_rejoin_leaves_live_table_alone() {
    let nodes = mesh(2, MessengerConfig::default());
    let member = &nodes[0].messenger;
    member.wait_for_all_ready().await;
    let network = PipeNetwork::default();
    let (go, wait) = oneshot::channel();
    go.send(()).unwrap();
    let replacement = tokio::spawn(answer_rejoin(network.offer(), Command::Complete, wait));

    member.prepare_rejoin(&network, REPLACEMENT, replacement_addr()).await.unwrap();
    member.rollback_rejoin(REPLACEMENT).unwrap();

    assert_eq!(member.foreign_host_count(), 1);
    assert_eq!(member.live_hosts(), vec![HostId(1)]);
    assert!(!member.is_up(REPLACEMENT));
    assert!(matches!(
        member.commit_rejoin(REPLACEMENT),
        Err(TransportError::NoPendingRejoin(REPLACEMENT))
    ));

    // The replacement sees the connection close without a ready frame.
    let mut far = replacement.await.unwrap();
    let frame = read_frame(&mut far, 1 << 20).await.unwrap();
    assert!(frame.is_none(), "unexpected frame {frame:?}");
}

#[tokio::test]
async fn committed_rejoin_sends_ready() {
    let nodes = mesh(2, MessengerConfig::default());
    let member = &nodes[0].messenger;
    let network = PipeNetwork::default();
    let (go, wait) = oneshot::channel();
    go.send(()).unwrap();
    let replacement = tokio::spawn(answer_rejoin(network.offer(), Command::Complete, wait));

    member.prepare_rejoin(&network, REPLACEMENT, replacement_addr()).await.unwrap();
    member.commit_rejoin(REPLACEMENT).unwrap();
    assert_eq!(member.live_hosts(), vec![HostId(1), REPLACEMENT]);

    let mut far = replacement.await.unwrap();
    let frame = read_frame(&mut far, 1 << 20).await.unwrap();
    assert!(matches!(
        frame,
        Some(InboundFrame::Control(meshbus_proto::ControlFrame::Ready { host: HostId(0) }))
    ));
}

#[tokio::test]
async fn second_prepare_is_refused_before_connecting() {
    let nodes = mesh(2, MessengerConfig::default());
    let member = nodes[0].messenger.clone();
    let network = Arc::new(PipeNetwork::default());
    let (go, wait) = oneshot::channel();
    let replacement = tokio::spawn(answer_rejoin(network.offer(), Command::Complete, wait));

    let first = tokio::spawn({
        let member = member.clone();
        let network = Arc::clone(&network);
        async move { member.prepare_rejoin(&*network, REPLACEMENT, replacement_addr()).await }
    });
    while *network.connects.lock() == 0 {
        tokio::task::yield_now().await;
    }

    let second = member.prepare_rejoin(&*network, REPLACEMENT, replacement_addr()).await;
    assert!(matches!(second, Err(TransportError::RejoinInProgress(REPLACEMENT))));
    assert_eq!(*network.connects.lock(), 1);

    go.send(()).unwrap();
    first.await.unwrap().unwrap();
    member.commit_rejoin(REPLACEMENT).unwrap();
    drop(replacement.await.unwrap());
}

#[tokio::test]
async fn refused_rejoin_frees_the_slot() {
    let nodes = mesh(2, MessengerConfig::default());
    let member = &nodes[0].messenger;
    let network = PipeNetwork::default();

    let (go, wait) = oneshot::channel();
    go.send(()).unwrap();
    let refusal = Command::JoinFail(JoinFailure::FAULT_MISMATCH);
    let refused = tokio::spawn(answer_rejoin(network.offer(), refusal, wait));
    let err = member.prepare_rejoin(&network, REPLACEMENT, replacement_addr()).await;
    assert!(matches!(
        err,
        Err(TransportError::RejoinRefused { host: REPLACEMENT, failure })
            if failure == JoinFailure::FAULT_MISMATCH
    ));
    drop(refused.await.unwrap());
    assert_eq!(member.live_hosts(), vec![HostId(1)]);

    let (go, wait) = oneshot::channel();
    go.send(()).unwrap();
    let accepted = tokio::spawn(answer_rejoin(network.offer(), Command::Complete, wait));
    member.prepare_rejoin(&network, REPLACEMENT, replacement_addr()).await.unwrap();
    member.rollback_rejoin(REPLACEMENT).unwrap();
    drop(accepted.await.unwrap());
}
