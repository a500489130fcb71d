//! Follower side of mesh formation.
//!
//! The follower binds its peer port before dialing the coordinator, then
//! obeys LISTEN and CONNECT commands until the coordinator concludes.

use std::collections::{BTreeMap, VecDeque};

use meshbus_core::{
    ClusterIdentity, Environment, HostId, JoinConfig, JoinError, Listener, MessengerConfig, Network,
    join::{FollowerAction, FollowerJoiner},
};
use meshbus_proto::Command;
use tracing::{debug, instrument, warn};

use super::Mesh;
use crate::{
    error::BootstrapError,
    io::{read_control, read_host_id, write_control, write_host_id},
};

/// Join a forming cluster through the coordinator at `join.coordinator`.
///
/// The peer listener on `join.listen` is bound before contacting the
/// coordinator so every later CONNECT finds it accepting.
#[instrument(skip_all, fields(coordinator = %join.coordinator))]
pub async fn run_follower<N: Network, E: Environment>(
    network: &N,
    env: &E,
    join: &JoinConfig,
    config: &MessengerConfig,
    identity: ClusterIdentity,
) -> Result<Mesh, BootstrapError> {
    let listener = network.bind(join.listen).await?;
    let internal_port = listener.local_addr()?.port();
    let mut control = connect_with_retry(network, env, join, config).await?;

    let mut joiner = FollowerJoiner::new(identity, internal_port);
    let mut peers: BTreeMap<HostId, N::Stream> = BTreeMap::new();
    let mut actions: VecDeque<_> = joiner.start()?.into();

    loop {
        let Some(action) = actions.pop_front() else {
            let command: Command = read_control(&mut control, config.max_frame_size).await?;
            actions.extend(joiner.handle_command(command, env.wall_clock_millis())?);
            continue;
        };

        match action {
            FollowerAction::Reply(reply) => write_control(&mut control, &reply).await?,
            FollowerAction::AcceptPeer => {
                let (mut stream, addr) = listener.accept().await?;
                let host = read_host_id(&mut stream).await?;
                debug!(peer = host.0, %addr, "peer identified");
                actions.extend(joiner.peer_accepted(host)?);
                peers.insert(host, stream);
            },
            FollowerAction::ConnectPeer { host, addr } => {
                let me = joiner.host().ok_or(JoinError::UnexpectedHost { host })?;
                let mut stream = network.connect(addr).await?;
                write_host_id(&mut stream, me).await?;
                peers.insert(host, stream);
                actions.extend(joiner.peer_connected(host)?);
            },
            FollowerAction::Finished(Ok(outcome)) => {
                peers.insert(HostId::COORDINATOR, control);
                return Ok(Mesh::new(outcome, peers));
            },
            FollowerAction::Finished(Err(failure)) => return Err(BootstrapError::Rejected(failure)),
        }
    }
}

async fn connect_with_retry<N: Network, E: Environment>(
    network: &N,
    env: &E,
    join: &JoinConfig,
    config: &MessengerConfig,
) -> Result<N::Stream, BootstrapError> {
    let attempts = config.connect_attempts.max(1);
    for attempt in 1..=attempts {
        match network.connect(join.coordinator).await {
            Ok(stream) => return Ok(stream),
            Err(err) if attempt < attempts => {
                debug!(attempt, error = %err, "coordinator not reachable yet");
                env.sleep(config.connect_retry_interval).await;
            },
            Err(err) => warn!(attempt, error = %err, "giving up on coordinator"),
        }
    }
    Err(BootstrapError::Unreachable { addr: join.coordinator, attempts })
}
