//! Admission of a replacement host.

use std::{collections::BTreeMap, net::SocketAddr};

use meshbus_core::{
    ClusterIdentity, Environment, HostId, Listener, MessengerConfig, Network,
    join::{RejoinAction, RejoinJoiner},
};
use meshbus_proto::{Command, ControlMessage, RejoinRequest};
use tracing::{debug, info, instrument, warn};

use super::Mesh;
use crate::{
    error::BootstrapError,
    io::{read_control, write_control},
};

/// Replace a failed host in a running cluster.
///
/// Listens on `listen` for the live members, which connect once the embedder
/// calls [`HostMessenger::prepare_rejoin`](crate::HostMessenger::prepare_rejoin)
/// on each of them. Gives up with JOINFAIL if not every live member connects
/// within [`MessengerConfig::rejoin_timeout`].
#[instrument(skip_all, fields(%listen))]
pub async fn run_rejoin<N: Network, E: Environment>(
    network: &N,
    env: &E,
    listen: SocketAddr,
    config: &MessengerConfig,
    identity: ClusterIdentity,
) -> Result<Mesh, BootstrapError> {
    let listener = network.bind(listen).await?;
    let mut joiner = RejoinJoiner::new(identity, config.max_clock_skew);
    joiner.start()?;
    info!("waiting for live members");

    let deadline = env.now() + config.rejoin_timeout;
    let mut members: BTreeMap<HostId, N::Stream> = BTreeMap::new();

    loop {
        let remaining = deadline.saturating_duration_since(env.now());
        let accepted =
            tokio::time::timeout(remaining, accept_request(&listener, config.max_frame_size)).await;

        let actions = match accepted {
            Ok(result) => {
                let Some((stream, request)) = result? else {
                    continue;
                };
                let member = request.member;
                debug!(member = member.0, "member connected");
                if members.insert(member, stream).is_some() {
                    warn!(member = member.0, "member connected twice");
                }
                joiner.handle_request(request, env.wall_clock_millis())?
            },
            Err(_) => joiner.timed_out(),
        };

        for action in actions {
            match action {
                RejoinAction::Send { to, command } => {
                    if let Some(stream) = members.get_mut(&to) {
                        write_control(stream, &command).await?;
                    }
                },
                RejoinAction::Finished(Ok(outcome)) => return Ok(Mesh::new(outcome, members)),
                RejoinAction::Finished(Err(failure)) => {
                    return Err(BootstrapError::Rejected(failure));
                },
            }
        }
    }
}

async fn accept_request<L: Listener>(
    listener: &L,
    max_len: usize,
) -> Result<Option<(L::Stream, RejoinRequest)>, BootstrapError> {
    let (mut stream, addr) = listener.accept().await?;
    match read_control(&mut stream, max_len).await {
        Ok(Command::RejoinRequest(request)) => Ok(Some((stream, request))),
        Ok(other) => {
            warn!(%addr, code = other.code(), "dropping connection without rejoin request");
            Ok(None)
        },
        Err(err) => {
            warn!(%addr, error = %err, "dropping connection without rejoin request");
            Ok(None)
        },
    }
}
