//! Coordinator side of mesh formation.
//!
//! Host 0 binds the bootstrap address, welcomes each follower with its host
//! id, tells follower pairs who connects to whom, then gathers clock and
//! checksum reports and announces COMPLETE or JOINFAIL.

use std::{
    collections::{BTreeMap, VecDeque},
    net::SocketAddr,
};

use meshbus_core::{
    ClusterIdentity, Environment, HostId, JoinConfig, JoinError, Listener, MessengerConfig, Network,
    join::{CoordinatorAction, CoordinatorJoiner},
};
use meshbus_proto::{InstanceId, Reply};
use tracing::{info, instrument};

use super::Mesh;
use crate::{
    error::BootstrapError,
    io::{read_control, write_control},
};

/// Form a new cluster as host 0.
///
/// Accepts `join.expected_hosts - 1` followers on `join.coordinator`, wires the
/// full mesh, and runs the consistency checks. Control connections to
/// followers become this host's mesh edges.
#[instrument(skip_all, fields(addr = %join.coordinator, hosts = join.expected_hosts))]
pub async fn run_coordinator<N: Network, E: Environment>(
    network: &N,
    env: &E,
    join: &JoinConfig,
    config: &MessengerConfig,
    identity: ClusterIdentity,
) -> Result<Mesh, BootstrapError> {
    let listener = network.bind(join.coordinator).await?;
    let instance =
        InstanceId { timestamp: env.wall_clock_millis(), coordinator: join.coordinator.to_string() };
    info!(timestamp = instance.timestamp, "forming cluster");

    let mut joiner = CoordinatorJoiner::new(
        join.expected_hosts,
        config.max_clock_skew,
        identity,
        instance,
        join.initial_txn_id,
    );
    let mut followers: BTreeMap<HostId, N::Stream> = BTreeMap::new();
    let mut actions: VecDeque<_> = joiner.start(env.wall_clock_millis())?.into();

    while let Some(action) = actions.pop_front() {
        match action {
            CoordinatorAction::AcceptFollower => {
                let (mut stream, peer) = listener.accept().await?;
                let Reply::Hello { internal_port } =
                    read_control(&mut stream, config.max_frame_size).await?
                else {
                    return Err(BootstrapError::MissingHello { addr: peer });
                };
                let addr = SocketAddr::new(peer.ip(), internal_port);
                actions.extend(joiner.accept_follower(addr, env.wall_clock_millis())?);
                if let Some(&host) = joiner.followers().keys().next_back() {
                    followers.insert(host, stream);
                }
            },
            CoordinatorAction::Send { to, command } => {
                let stream = followers.get_mut(&to).ok_or(JoinError::UnexpectedHost { host: to })?;
                write_control(stream, &command).await?;
            },
            CoordinatorAction::AwaitReply { from } => {
                let stream =
                    followers.get_mut(&from).ok_or(JoinError::UnexpectedHost { host: from })?;
                let reply = read_control(stream, config.max_frame_size).await?;
                actions.extend(joiner.handle_reply(from, reply, env.wall_clock_millis())?);
            },
            CoordinatorAction::Finished(Ok(outcome)) => return Ok(Mesh::new(outcome, followers)),
            CoordinatorAction::Finished(Err(failure)) => {
                return Err(BootstrapError::Rejected(failure));
            },
        }
    }
    Err(JoinError::Finished.into())
}
