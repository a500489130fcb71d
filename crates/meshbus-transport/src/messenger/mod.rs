//! Steady-state messaging over a formed mesh.
//!
//! [`HostMessenger`] owns one [`ForeignHost`] per remote host. Each has a
//! reader task that decodes frames and routes them to local mailboxes, and a
//! writer task that drains an outbound queue. Sending never blocks on the
//! network: the caller encodes the message body once, writes a small routing
//! header per host into a pooled buffer, and enqueues both.
//!
//! Failure detection happens on send. A send to a host that has been silent
//! for longer than the dead-host timeout raises one fault and drops the frame;
//! later sends to that host are dropped without further faults. A broken
//! connection raises the same single fault from the reader or writer task.

mod foreign;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use foreign::{ForeignHost, Outbound};
use meshbus_core::{
    BoxStream, ClusterIdentity, Environment, FaultCause, FaultHandler, HostId, MailboxId,
    MailboxRegistry, MessengerConfig, Network, NodeFault, SendVerdict, SiteId, join::rejoin_request,
};
use meshbus_proto::{
    BufferPool, CatalogUpdate, Command, ControlFrame, ControlMessage, EncodedBody, EnvelopeHeader,
    InboundFrame, InstanceId, Message,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    bootstrap::Mesh,
    error::TransportError,
    io::{read_control, write_control},
};

/// Everything a messenger needs besides the mesh itself.
pub struct MessengerParts<E> {
    /// Timeouts and limits
    pub config: MessengerConfig,
    /// Clock source
    pub env: E,
    /// Values compared when a replacement host rejoins
    pub identity: ClusterIdentity,
    /// Local mailboxes
    pub registry: Arc<MailboxRegistry>,
    /// Failure sink
    pub faults: Arc<dyn FaultHandler>,
}

struct PendingRejoin {
    host: HostId,
    stream: BoxStream,
}

/// At most one rejoin per member, from the moment it starts connecting.
enum RejoinSlot {
    Preparing(HostId),
    Staged(PendingRejoin),
}

impl RejoinSlot {
    fn host(&self) -> HostId {
        match self {
            Self::Preparing(host) => *host,
            Self::Staged(pending) => pending.host,
        }
    }
}

/// Frees a `Preparing` slot if the exchange fails or is cancelled.
struct Reservation<'a> {
    slot: &'a Mutex<Option<RejoinSlot>>,
    host: HostId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Some(RejoinSlot::Preparing(host)) if host == self.host) {
            *slot = None;
        }
    }
}

struct Inner<E> {
    local: HostId,
    instance: InstanceId,
    initial_txn_id: i64,
    config: MessengerConfig,
    env: E,
    identity: ClusterIdentity,
    registry: Arc<MailboxRegistry>,
    faults: Arc<dyn FaultHandler>,
    pool: BufferPool,
    hosts: Mutex<HashMap<HostId, ForeignHost>>,
    generations: AtomicU64,
    pending: Mutex<Option<RejoinSlot>>,
    ready: Mutex<BTreeSet<HostId>>,
    ready_changed: Notify,
    catalog: Mutex<Option<CatalogUpdate>>,
    shut_down: AtomicBool,
}

/// Per-process messaging endpoint.
///
/// Cheap to clone; clones share the same connections. Must be created and
/// used inside a Tokio runtime. Connection tasks hold a reference to the
/// messenger, so call [`shutdown`](Self::shutdown) to release it.
pub struct HostMessenger<E: Environment> {
    inner: Arc<Inner<E>>,
}

impl<E: Environment> Clone for HostMessenger<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment> HostMessenger<E> {
    /// Take over the connections of a formed mesh and announce readiness to
    /// every peer.
    pub fn start(mesh: Mesh, parts: MessengerParts<E>) -> Result<Self, TransportError> {
        let Mesh { outcome, peers } = mesh;
        let inner = Arc::new(Inner {
            local: outcome.host,
            instance: outcome.instance,
            initial_txn_id: outcome.initial_txn_id,
            config: parts.config,
            env: parts.env,
            identity: parts.identity,
            registry: parts.registry,
            faults: parts.faults,
            pool: BufferPool::default(),
            hosts: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            pending: Mutex::new(None),
            ready: Mutex::new(BTreeSet::new()),
            ready_changed: Notify::new(),
            catalog: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        for (host, stream) in peers {
            inner.install(host, stream);
        }
        info!(host_id = inner.local.0, peers = inner.hosts.lock().len(), "messenger started");

        let messenger = Self { inner };
        messenger.broadcast(&ControlFrame::Ready { host: messenger.inner.local })?;
        Ok(messenger)
    }

    /// This host's id.
    pub fn local_host(&self) -> HostId {
        self.inner.local
    }

    /// Cluster incarnation this host belongs to.
    pub fn instance(&self) -> &InstanceId {
        &self.inner.instance
    }

    /// First global transaction id of the cluster.
    pub fn initial_txn_id(&self) -> i64 {
        self.inner.initial_txn_id
    }

    /// Local mailboxes.
    pub fn registry(&self) -> &Arc<MailboxRegistry> {
        &self.inner.registry
    }

    /// Send `message` to one site's mailbox.
    pub fn send(
        &self,
        site: SiteId,
        mailbox: MailboxId,
        message: Message,
    ) -> Result<(), TransportError> {
        self.send_many(&[site], mailbox, message)
    }

    /// Send `message` to the same mailbox on several sites.
    ///
    /// Sites on this host are delivered directly. Sites on each remote host
    /// share one frame listing all of them. The body is encoded at most once.
    pub fn send_many(
        &self,
        sites: &[SiteId],
        mailbox: MailboxId,
        message: Message,
    ) -> Result<(), TransportError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }

        let mut by_host: BTreeMap<HostId, Vec<SiteId>> = BTreeMap::new();
        for &site in sites {
            let destinations = by_host.entry(site.host()).or_default();
            if !destinations.contains(&site) {
                destinations.push(site);
            }
        }

        let body = EncodedBody::new(message);
        // Encode before any local delivery so a failure delivers nothing.
        if by_host.keys().any(|&host| host != self.inner.local) {
            body.bytes()?;
        }
        let now = self.inner.env.now();
        for (host, destinations) in by_host {
            if host == self.inner.local {
                for site in destinations {
                    self.inner.registry.deliver(site, mailbox, body.message().clone());
                }
                continue;
            }
            self.inner.send_remote(host, EnvelopeHeader { mailbox, destinations }, &body, now)?;
        }
        Ok(())
    }

    /// Wait until every connected, live host has announced readiness.
    pub async fn wait_for_all_ready(&self) {
        loop {
            let changed = self.inner.ready_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if self.inner.all_ready() {
                return;
            }
            changed.await;
        }
    }

    /// Hosts that have announced readiness.
    pub fn ready_hosts(&self) -> BTreeSet<HostId> {
        self.inner.ready.lock().clone()
    }

    /// Propagate a catalog to every live host. Receivers keep the newest
    /// version they have seen.
    pub fn send_catalog(&self, update: CatalogUpdate) -> Result<(), TransportError> {
        let frame = ControlFrame::Catalog(update.clone());
        self.inner.offer_catalog(update);
        self.broadcast(&frame)
    }

    /// Newest catalog sent or received.
    pub fn latest_catalog(&self) -> Option<CatalogUpdate> {
        self.inner.catalog.lock().clone()
    }

    /// Tell every live host to crash.
    pub fn send_poison(&self, reason: &str) -> Result<(), TransportError> {
        warn!(reason, "broadcasting poison pill");
        self.broadcast(&ControlFrame::Poison { reason: reason.to_owned() })
    }

    /// Connect to a replacement for `host` listening at `addr` and offer it
    /// this member's view of the cluster.
    ///
    /// On COMPLETE the connection is staged. The embedder then calls
    /// [`commit_rejoin`](Self::commit_rejoin) or
    /// [`rollback_rejoin`](Self::rollback_rejoin).
    #[instrument(skip(self, network), fields(local = self.inner.local.0))]
    pub async fn prepare_rejoin<N: Network>(
        &self,
        network: &N,
        host: HostId,
        addr: SocketAddr,
    ) -> Result<(), TransportError> {
        let _reservation = {
            let mut slot = self.inner.pending.lock();
            if let Some(existing) = slot.as_ref() {
                return Err(TransportError::RejoinInProgress(existing.host()));
            }
            *slot = Some(RejoinSlot::Preparing(host));
            Reservation { slot: &self.inner.pending, host }
        };

        let stream = self.exchange_rejoin(network, host, addr).await?;

        let mut slot = self.inner.pending.lock();
        if !matches!(*slot, Some(RejoinSlot::Preparing(reserved)) if reserved == host) {
            return Err(TransportError::Shutdown);
        }
        debug!(host = host.0, "rejoin staged");
        *slot = Some(RejoinSlot::Staged(PendingRejoin { host, stream }));
        Ok(())
    }

    async fn exchange_rejoin<N: Network>(
        &self,
        network: &N,
        host: HostId,
        addr: SocketAddr,
    ) -> Result<BoxStream, TransportError> {
        let mut stream = network.connect(addr).await?;
        let mut live_hosts: Vec<HostId> =
            self.live_hosts().into_iter().filter(|&h| h != host).collect();
        live_hosts.push(self.inner.local);
        live_hosts.sort_unstable();

        let request = rejoin_request(
            self.inner.local,
            host,
            self.inner.instance.clone(),
            self.inner.initial_txn_id,
            live_hosts,
            &self.inner.identity,
            self.inner.env.wall_clock_millis(),
        );
        write_control(&mut stream, &Command::RejoinRequest(request)).await?;

        match read_control(&mut stream, self.inner.config.max_frame_size).await? {
            Command::Complete => {
                let stream: BoxStream = Box::new(stream);
                Ok(stream)
            },
            Command::JoinFail(failure) => {
                warn!(host = host.0, ?failure, "rejoin refused");
                Err(TransportError::RejoinRefused { host, failure })
            },
            other => Err(TransportError::UnexpectedReply(other.code())),
        }
    }

    /// Install the staged connection to `host`, replacing any earlier one.
    pub fn commit_rejoin(&self, host: HostId) -> Result<(), TransportError> {
        let pending = self.inner.take_pending(host)?;
        let ready = ControlFrame::Ready { host: self.inner.local }.encode()?;

        self.inner.ready.lock().remove(&host);
        self.inner.install(host, pending.stream);
        if let Some(foreign) = self.inner.hosts.lock().get(&host) {
            foreign.enqueue(Outbound::Control(ready));
        }
        info!(host = host.0, "rejoin committed");
        Ok(())
    }

    /// Drop the staged connection to `host`.
    pub fn rollback_rejoin(&self, host: HostId) -> Result<(), TransportError> {
        drop(self.inner.take_pending(host)?);
        info!(host = host.0, "rejoin rolled back");
        Ok(())
    }

    /// Hosts with a live connection, in id order.
    pub fn live_hosts(&self) -> Vec<HostId> {
        let mut hosts: Vec<HostId> = self
            .inner
            .hosts
            .lock()
            .iter()
            .filter(|(_, foreign)| foreign.liveness.lock().is_up())
            .map(|(&host, _)| host)
            .collect();
        hosts.sort_unstable();
        hosts
    }

    /// True while `host` has a live connection.
    pub fn is_up(&self, host: HostId) -> bool {
        self.inner.hosts.lock().get(&host).is_some_and(|foreign| foreign.liveness.lock().is_up())
    }

    /// Remote hosts with a connection entry, live or not.
    pub fn foreign_host_count(&self) -> usize {
        self.inner.hosts.lock().len()
    }

    /// Frames queued to `host` on its current connection.
    pub fn frames_sent_to(&self, host: HostId) -> u64 {
        self.inner.hosts.lock().get(&host).map_or(0, ForeignHost::frames_sent)
    }

    /// Close the connection to `host`. Returns false if there was none.
    ///
    /// A host that was still up is reported with [`FaultCause::Closed`].
    pub fn close_host(&self, host: HostId) -> bool {
        let Some(foreign) = self.inner.hosts.lock().remove(&host) else {
            return false;
        };
        let was_up = foreign.liveness.lock().mark_closing();
        foreign.close();
        self.inner.ready.lock().remove(&host);
        if was_up {
            self.inner.raise(host, FaultCause::Closed);
        }
        self.inner.ready_changed.notify_waiters();
        true
    }

    /// Close every connection and refuse further sends. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let hosts: Vec<ForeignHost> = self.inner.hosts.lock().drain().map(|(_, f)| f).collect();
        for foreign in &hosts {
            foreign.liveness.lock().mark_closing();
            foreign.close();
        }
        self.inner.pending.lock().take();
        self.inner.ready_changed.notify_waiters();
        info!(host_id = self.inner.local.0, closed = hosts.len(), "messenger shut down");
    }

    fn broadcast(&self, frame: &ControlFrame) -> Result<(), TransportError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let bytes = frame.encode()?;
        for foreign in self.inner.hosts.lock().values() {
            if foreign.liveness.lock().is_up() {
                foreign.enqueue(Outbound::Control(bytes.clone()));
            }
        }
        Ok(())
    }
}

impl<E: Environment> Inner<E> {
    fn install(self: &Arc<Self>, host: HostId, stream: BoxStream) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let foreign = ForeignHost::spawn(self, host, generation, stream);
        if let Some(previous) = self.hosts.lock().insert(host, foreign) {
            debug!(host = host.0, "replaced connection");
            previous.close();
        }
    }

    fn take_pending(&self, host: HostId) -> Result<PendingRejoin, TransportError> {
        let mut pending = self.pending.lock();
        match pending.take() {
            Some(RejoinSlot::Staged(staged)) if staged.host == host => Ok(staged),
            other => {
                *pending = other;
                Err(TransportError::NoPendingRejoin(host))
            },
        }
    }

    fn send_remote(
        &self,
        host: HostId,
        header: EnvelopeHeader,
        body: &EncodedBody,
        now: std::time::Instant,
    ) -> Result<(), TransportError> {
        let verdict = {
            let hosts = self.hosts.lock();
            let Some(foreign) = hosts.get(&host) else {
                debug!(host = host.0, "dropping frame for unknown host");
                return Ok(());
            };
            let verdict = foreign.liveness.lock().on_send(now);
            if verdict == SendVerdict::Proceed {
                let mut buffer = self.pool.acquire();
                let body = body.write_header(&header, &mut buffer)?;
                foreign.enqueue(Outbound::Mailbox { header: buffer, body });
            }
            verdict
        };

        if let SendVerdict::RaiseFault { silence } = verdict {
            self.raise(host, FaultCause::DeadHostTimeout { silence });
            self.ready_changed.notify_waiters();
        }
        Ok(())
    }

    fn dispatch(&self, from: HostId, frame: InboundFrame) {
        match frame {
            InboundFrame::Mailbox { header, message } => {
                self.registry.deliver_envelope(&header, message);
            },
            InboundFrame::Control(ControlFrame::Ready { host }) => {
                if host != from {
                    warn!(from = from.0, claimed = host.0, "ready announced for another host");
                }
                debug!(host = host.0, "host ready");
                self.ready.lock().insert(host);
                self.ready_changed.notify_waiters();
            },
            InboundFrame::Control(ControlFrame::Catalog(update)) => self.offer_catalog(update),
            InboundFrame::Control(ControlFrame::Poison { reason }) => {
                error!(from = from.0, reason, "poison pill received");
                self.faults.crash(&reason);
            },
        }
    }

    fn offer_catalog(&self, update: CatalogUpdate) {
        let mut catalog = self.catalog.lock();
        if catalog.as_ref().is_none_or(|current| update.version > current.version) {
            debug!(version = update.version, txn_id = update.txn_id, "catalog updated");
            *catalog = Some(update);
        }
    }

    fn connection_lost(&self, host: HostId, generation: u64) {
        let went_down = self
            .hosts
            .lock()
            .get(&host)
            .filter(|foreign| foreign.generation == generation)
            .is_some_and(|foreign| foreign.liveness.lock().mark_down());
        if went_down {
            self.raise(host, FaultCause::ConnectionLost);
        }
        self.ready_changed.notify_waiters();
    }

    fn all_ready(&self) -> bool {
        let ready = self.ready.lock();
        self.hosts
            .lock()
            .iter()
            .filter(|(_, foreign)| foreign.liveness.lock().is_up())
            .all(|(host, _)| ready.contains(host))
    }

    fn raise(&self, failed: HostId, cause: FaultCause) {
        let fault = NodeFault { failed, detected_by: self.local, cause };
        warn!(%fault, "host failed");
        self.faults.host_failed(fault);
    }
}
