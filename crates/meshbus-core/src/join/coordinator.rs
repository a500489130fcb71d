//! Bootstrap coordinator (host 0).
//!
//! The coordinator admits `expected_hosts - 1` followers, assigning ids in
//! arrival order, then directs every follower pair `(i, j)` with `i < j` to
//! connect: LISTEN to `i`, wait for LISTENING, CONNECT to `j`, wait for
//! CONNECTED. Its own control connections double as its mesh edges, so the
//! finished mesh has `N * (N - 1) / 2` edges. Finally it collects a
//! [`ConsistencyReport`] from every follower and broadcasts COMPLETE or
//! JOINFAIL.

use std::{
    collections::{BTreeMap, VecDeque},
    net::SocketAddr,
    time::Duration,
};

use meshbus_proto::{
    Command, ConsistencyReport, ControlMessage, HostId, InstanceId, JoinFailure, Reply,
};
use tracing::{debug, error, info};

use super::{JoinOutcome, JoinPhase};
use crate::{checks, config::ClusterIdentity, error::JoinError};

/// Effects requested by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Accept the next follower connection and read its HELLO
    AcceptFollower,
    /// Write `command` on the control connection to `to`
    Send {
        /// Follower
        to: HostId,
        /// Command to write
        command: Command,
    },
    /// Read the next reply from `from`
    AwaitReply {
        /// Follower
        from: HostId,
    },
    /// Bootstrap ended; no further input is accepted
    Finished(Result<JoinOutcome, JoinFailure>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairStep {
    AwaitListening { listener: HostId, connector: HostId },
    AwaitConnected { connector: HostId },
}

/// Coordinator side of mesh formation.
#[derive(Debug)]
pub struct CoordinatorJoiner {
    phase: JoinPhase,
    expected_hosts: usize,
    max_skew: Duration,
    identity: ClusterIdentity,
    instance: InstanceId,
    initial_txn_id: i64,
    followers: BTreeMap<HostId, SocketAddr>,
    pairs: VecDeque<(HostId, HostId)>,
    step: Option<PairStep>,
    local_report: Option<ConsistencyReport>,
    reports: BTreeMap<HostId, ConsistencyReport>,
}

impl CoordinatorJoiner {
    /// Create a coordinator for a cluster of `expected_hosts` hosts.
    pub fn new(
        expected_hosts: usize,
        max_skew: Duration,
        identity: ClusterIdentity,
        instance: InstanceId,
        initial_txn_id: i64,
    ) -> Self {
        Self {
            phase: JoinPhase::Unstarted,
            expected_hosts,
            max_skew,
            identity,
            instance,
            initial_txn_id,
            followers: BTreeMap::new(),
            pairs: VecDeque::new(),
            step: None,
            local_report: None,
            reports: BTreeMap::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    /// Followers admitted so far and their peer listen addresses.
    pub fn followers(&self) -> &BTreeMap<HostId, SocketAddr> {
        &self.followers
    }

    /// Begin listening. A single-host cluster completes immediately.
    pub fn start(&mut self, now_ms: i64) -> Result<Vec<CoordinatorAction>, JoinError> {
        if self.phase != JoinPhase::Unstarted {
            return Err(JoinError::Finished);
        }
        self.phase = JoinPhase::Listening;
        debug!(expected_hosts = self.expected_hosts, "coordinator listening");

        if self.expected_hosts <= 1 {
            return Ok(self.begin_mesh(now_ms));
        }
        Ok(vec![CoordinatorAction::AcceptFollower])
    }

    /// A follower connected and announced its peer listen address.
    pub fn accept_follower(
        &mut self,
        addr: SocketAddr,
        now_ms: i64,
    ) -> Result<Vec<CoordinatorAction>, JoinError> {
        match self.phase {
            JoinPhase::Listening | JoinPhase::Accepting => {},
            JoinPhase::Complete | JoinPhase::Failed => return Err(JoinError::Finished),
            _ => return Err(JoinError::TooManyHosts { expected: self.expected_hosts }),
        }
        self.phase = JoinPhase::Accepting;

        let host = HostId(self.followers.len() as i32 + 1);
        self.followers.insert(host, addr);
        debug!(host_id = host.0, %addr, "follower admitted");

        let mut actions = vec![CoordinatorAction::Send {
            to: host,
            command: Command::Welcome {
                host,
                instance: self.instance.clone(),
                initial_txn_id: self.initial_txn_id,
            },
        }];

        if self.followers.len() + 1 < self.expected_hosts {
            actions.push(CoordinatorAction::AcceptFollower);
        } else {
            actions.extend(self.begin_mesh(now_ms));
        }
        Ok(actions)
    }

    /// A follower replied on its control connection.
    pub fn handle_reply(
        &mut self,
        from: HostId,
        reply: Reply,
        now_ms: i64,
    ) -> Result<Vec<CoordinatorAction>, JoinError> {
        match (self.phase, self.step, reply) {
            (
                JoinPhase::MeshBuilding,
                Some(PairStep::AwaitListening { listener, connector }),
                Reply::Listening,
            ) if from == listener => {
                let addr = self.followers.get(&listener).copied().ok_or(JoinError::UnexpectedHost {
                    host: listener,
                })?;
                self.step = Some(PairStep::AwaitConnected { connector });
                Ok(vec![
                    CoordinatorAction::Send {
                        to: connector,
                        command: Command::Connect { host: listener, addr },
                    },
                    CoordinatorAction::AwaitReply { from: connector },
                ])
            },
            (
                JoinPhase::MeshBuilding,
                Some(PairStep::AwaitConnected { connector }),
                Reply::Connected,
            ) if from == connector => Ok(self.next_pair(now_ms)),
            (JoinPhase::ConsistencyCheck, _, Reply::TimeAndCrc(report)) => {
                if report.host != from
                    || !self.followers.contains_key(&from)
                    || self.reports.contains_key(&from)
                {
                    return Err(JoinError::UnexpectedHost { host: from });
                }
                self.reports.insert(from, report);
                if self.reports.len() < self.followers.len() {
                    return Ok(Vec::new());
                }
                Ok(self.finish())
            },
            (JoinPhase::MeshBuilding, Some(_), Reply::Listening | Reply::Connected) => {
                Err(JoinError::UnexpectedHost { host: from })
            },
            (phase, ..) if phase.is_terminal() => Err(JoinError::Finished),
            (phase, _, reply) => Err(JoinError::Unexpected { phase, code: reply.code() }),
        }
    }

    fn begin_mesh(&mut self, now_ms: i64) -> Vec<CoordinatorAction> {
        self.phase = JoinPhase::MeshBuilding;
        let hosts: Vec<HostId> = self.followers.keys().copied().collect();
        for (index, listener) in hosts.iter().enumerate() {
            for connector in &hosts[index + 1..] {
                self.pairs.push_back((*listener, *connector));
            }
        }
        debug!(followers = hosts.len(), pairs = self.pairs.len(), "building mesh");
        self.next_pair(now_ms)
    }

    fn next_pair(&mut self, now_ms: i64) -> Vec<CoordinatorAction> {
        let Some((listener, connector)) = self.pairs.pop_front() else {
            self.step = None;
            return self.begin_check(now_ms);
        };
        self.step = Some(PairStep::AwaitListening { listener, connector });
        vec![
            CoordinatorAction::Send { to: listener, command: Command::Listen },
            CoordinatorAction::AwaitReply { from: listener },
        ]
    }

    fn begin_check(&mut self, now_ms: i64) -> Vec<CoordinatorAction> {
        self.phase = JoinPhase::ConsistencyCheck;
        self.local_report = Some(self.identity.report(HostId::COORDINATOR, now_ms));
        debug!("collecting clocks and checksums");

        if self.followers.is_empty() {
            return self.finish();
        }

        let sends = self
            .followers
            .keys()
            .map(|&to| CoordinatorAction::Send { to, command: Command::SendTimeAndCrc });
        let awaits = self.followers.keys().map(|&from| CoordinatorAction::AwaitReply { from });
        sends.chain(awaits).collect()
    }

    fn finish(&mut self) -> Vec<CoordinatorAction> {
        let local = self.local_report.unwrap_or_else(|| self.identity.report(HostId::COORDINATOR, 0));
        let reports: Vec<ConsistencyReport> = self.reports.values().copied().collect();
        let failure = checks::evaluate(&local, &reports, self.max_skew);

        let (command, result) = if failure.is_empty() {
            self.phase = JoinPhase::Complete;
            info!(hosts = self.followers.len() + 1, "mesh formed");
            let outcome = JoinOutcome {
                host: HostId::COORDINATOR,
                instance: self.instance.clone(),
                initial_txn_id: self.initial_txn_id,
                peers: self.followers.keys().copied().collect(),
            };
            (Command::Complete, Ok(outcome))
        } else {
            self.phase = JoinPhase::Failed;
            error!(bits = failure.bits(), ?failure, "cluster consistency check failed");
            (Command::JoinFail(failure), Err(failure))
        };

        let mut actions: Vec<CoordinatorAction> = self
            .followers
            .keys()
            .map(|&to| CoordinatorAction::Send { to, command: command.clone() })
            .collect();
        actions.push(CoordinatorAction::Finished(result));
        actions
    }
}
