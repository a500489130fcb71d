//! Bootstrap follower.

use std::{collections::BTreeSet, net::SocketAddr};

use meshbus_proto::{Command, ControlMessage, HostId, InstanceId, JoinFailure, Reply};
use tracing::{debug, error, info};

use super::{JoinOutcome, JoinPhase};
use crate::{config::ClusterIdentity, error::JoinError};

/// Effects requested by a follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowerAction {
    /// Write a reply on the coordinator connection
    Reply(Reply),
    /// Accept one inbound peer connection and read its host id, then call
    /// [`FollowerJoiner::peer_accepted`]
    AcceptPeer,
    /// Connect to `host`, write this host's id, then call
    /// [`FollowerJoiner::peer_connected`]
    ConnectPeer {
        /// Peer host
        host: HostId,
        /// Peer listen address
        addr: SocketAddr,
    },
    /// Bootstrap ended; no further input is accepted
    Finished(Result<JoinOutcome, JoinFailure>),
}

#[derive(Debug, Clone)]
struct Assignment {
    host: HostId,
    instance: InstanceId,
    initial_txn_id: i64,
}

/// Follower side of mesh formation.
#[derive(Debug)]
pub struct FollowerJoiner {
    phase: JoinPhase,
    identity: ClusterIdentity,
    internal_port: u16,
    assignment: Option<Assignment>,
    peers: BTreeSet<HostId>,
}

impl FollowerJoiner {
    /// Create a follower that accepts peers on `internal_port`.
    pub fn new(identity: ClusterIdentity, internal_port: u16) -> Self {
        Self {
            phase: JoinPhase::Unstarted,
            identity,
            internal_port,
            assignment: None,
            peers: BTreeSet::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    /// Host id assigned by the coordinator, once known.
    pub fn host(&self) -> Option<HostId> {
        self.assignment.as_ref().map(|a| a.host)
    }

    /// Connected to the coordinator; announce the peer listen port.
    pub fn start(&mut self) -> Result<Vec<FollowerAction>, JoinError> {
        if self.phase != JoinPhase::Unstarted {
            return Err(JoinError::Finished);
        }
        self.phase = JoinPhase::Connecting;
        Ok(vec![FollowerAction::Reply(Reply::Hello { internal_port: self.internal_port })])
    }

    /// Process a command from the coordinator.
    pub fn handle_command(
        &mut self,
        command: Command,
        now_ms: i64,
    ) -> Result<Vec<FollowerAction>, JoinError> {
        let phase = self.phase;
        match (phase, command) {
            (JoinPhase::Connecting, Command::Welcome { host, instance, initial_txn_id }) => {
                debug!(host_id = host.0, "assigned host id");
                self.assignment = Some(Assignment { host, instance, initial_txn_id });
                self.peers.insert(HostId::COORDINATOR);
                self.phase = JoinPhase::PeerWiring;
                Ok(Vec::new())
            },
            (JoinPhase::PeerWiring, Command::Listen) => {
                Ok(vec![FollowerAction::Reply(Reply::Listening), FollowerAction::AcceptPeer])
            },
            (JoinPhase::PeerWiring, Command::Connect { host, addr }) => {
                Ok(vec![FollowerAction::ConnectPeer { host, addr }])
            },
            (JoinPhase::PeerWiring | JoinPhase::ConsistencyCheck, Command::SendTimeAndCrc) => {
                let host = self
                    .host()
                    .ok_or(JoinError::Unexpected { phase, code: Command::SendTimeAndCrc.code() })?;
                self.phase = JoinPhase::ConsistencyCheck;
                let report = self.identity.report(host, now_ms);
                Ok(vec![FollowerAction::Reply(Reply::TimeAndCrc(report))])
            },
            (JoinPhase::ConsistencyCheck, Command::Complete) => {
                let Some(assignment) = self.assignment.clone() else {
                    return Err(JoinError::Unexpected { phase, code: Command::Complete.code() });
                };
                self.phase = JoinPhase::Complete;
                info!(host_id = assignment.host.0, peers = self.peers.len(), "joined mesh");
                Ok(vec![FollowerAction::Finished(Ok(JoinOutcome {
                    host: assignment.host,
                    instance: assignment.instance,
                    initial_txn_id: assignment.initial_txn_id,
                    peers: self.peers.iter().copied().collect(),
                }))])
            },
            (phase, Command::JoinFail(failure)) if !phase.is_terminal() => {
                self.phase = JoinPhase::Failed;
                error!(bits = failure.bits(), ?failure, "coordinator rejected bootstrap");
                Ok(vec![FollowerAction::Finished(Err(failure))])
            },
            (phase, _) if phase.is_terminal() => Err(JoinError::Finished),
            (phase, command) => Err(JoinError::Unexpected { phase, code: command.code() }),
        }
    }

    /// An inbound peer connection identified itself as `host`.
    pub fn peer_accepted(&mut self, host: HostId) -> Result<Vec<FollowerAction>, JoinError> {
        self.add_peer(host)?;
        debug!(peer = host.0, "accepted peer");
        Ok(Vec::new())
    }

    /// The outbound connection to `host` is established.
    pub fn peer_connected(&mut self, host: HostId) -> Result<Vec<FollowerAction>, JoinError> {
        self.add_peer(host)?;
        debug!(peer = host.0, "connected to peer");
        Ok(vec![FollowerAction::Reply(Reply::Connected)])
    }

    fn add_peer(&mut self, host: HostId) -> Result<(), JoinError> {
        if self.phase != JoinPhase::PeerWiring || Some(host) == self.host() || !self.peers.insert(host)
        {
            return Err(JoinError::UnexpectedHost { host });
        }
        Ok(())
    }
}
