//! Admission of one replacement host into a running mesh.
//!
//! Roles are reversed relative to bootstrap: the rejoining host listens and
//! every live member connects to it with a [`RejoinRequest`]. Once every host
//! named in the members' live-host set has connected, the rejoining host runs
//! the same clock and checksum checks as bootstrap plus a membership check,
//! then answers each member with COMPLETE or JOINFAIL. A failed rejoin ends
//! only the rejoining process; the running cluster rolls back.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use meshbus_proto::{
    Command, ConsistencyReport, ControlMessage, HostId, InstanceId, JoinFailure, RejoinRequest,
};
use tracing::{debug, error, info, warn};

use super::{JoinOutcome, JoinPhase};
use crate::{checks, config::ClusterIdentity, error::JoinError};

/// Effects requested by the rejoining host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejoinAction {
    /// Write `command` on the connection from member `to`
    Send {
        /// Member
        to: HostId,
        /// COMPLETE or JOINFAIL
        command: Command,
    },
    /// Rejoin ended; no further input is accepted
    Finished(Result<JoinOutcome, JoinFailure>),
}

/// Build the request a live member sends to a rejoining host.
pub fn rejoin_request(
    member: HostId,
    assigned: HostId,
    instance: InstanceId,
    initial_txn_id: i64,
    live_hosts: Vec<HostId>,
    identity: &ClusterIdentity,
    now_ms: i64,
) -> RejoinRequest {
    RejoinRequest {
        member,
        assigned,
        instance,
        initial_txn_id,
        live_hosts,
        restore_done: identity.restore_done,
        report: identity.report(member, now_ms),
    }
}

/// Rejoining host's side of admission.
#[derive(Debug)]
pub struct RejoinJoiner {
    phase: JoinPhase,
    identity: ClusterIdentity,
    max_skew: Duration,
    requests: BTreeMap<HostId, RejoinRequest>,
}

impl RejoinJoiner {
    /// Create a rejoiner holding this host's consistency values.
    pub fn new(identity: ClusterIdentity, max_skew: Duration) -> Self {
        Self { phase: JoinPhase::Unstarted, identity, max_skew, requests: BTreeMap::new() }
    }

    /// Current phase.
    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    /// Begin accepting member connections.
    pub fn start(&mut self) -> Result<(), JoinError> {
        if self.phase != JoinPhase::Unstarted {
            return Err(JoinError::Finished);
        }
        self.phase = JoinPhase::Listening;
        debug!("waiting for rejoin requests");
        Ok(())
    }

    /// Members that have connected so far.
    pub fn connected(&self) -> BTreeSet<HostId> {
        self.requests.keys().copied().collect()
    }

    /// Hosts named by the first request that have not connected yet.
    pub fn missing(&self) -> BTreeSet<HostId> {
        let Some(first) = self.requests.values().next() else {
            return BTreeSet::new();
        };
        first.live_hosts.iter().filter(|host| !self.requests.contains_key(host)).copied().collect()
    }

    /// A member connected and sent its request.
    pub fn handle_request(
        &mut self,
        request: RejoinRequest,
        now_ms: i64,
    ) -> Result<Vec<RejoinAction>, JoinError> {
        if self.phase != JoinPhase::Listening {
            return Err(if self.phase.is_terminal() {
                JoinError::Finished
            } else {
                let code = Command::RejoinRequest(request).code();
                JoinError::Unexpected { phase: self.phase, code }
            });
        }

        let member = request.member;
        if let Some(first) = self.requests.values().next() {
            if first.assigned != request.assigned
                || first.instance != request.instance
                || first.initial_txn_id != request.initial_txn_id
            {
                return Err(JoinError::ConflictingRejoin { member });
            }
        }
        if member == request.assigned || self.requests.contains_key(&member) {
            return Err(JoinError::UnexpectedHost { host: member });
        }

        debug!(member = member.0, assigned = request.assigned.0, "rejoin request");
        self.requests.insert(member, request);

        if self.missing().is_empty() {
            return Ok(self.evaluate(now_ms));
        }
        Ok(Vec::new())
    }

    /// Not every member connected within the rejoin timeout.
    pub fn timed_out(&mut self) -> Vec<RejoinAction> {
        if self.phase.is_terminal() {
            return Vec::new();
        }
        warn!(missing = ?self.missing(), "rejoin timed out waiting for members");
        self.conclude(JoinFailure::FAULT_MISMATCH)
    }

    fn evaluate(&mut self, now_ms: i64) -> Vec<RejoinAction> {
        self.phase = JoinPhase::ConsistencyCheck;

        let assigned = self.requests.values().next().map_or(HostId::COORDINATOR, |r| r.assigned);
        let local = self.identity.report(assigned, now_ms);
        let reports: Vec<ConsistencyReport> = self.requests.values().map(|r| r.report).collect();
        let connected = self.connected();

        let failure = checks::evaluate(&local, &reports, self.max_skew)
            | checks::evaluate_membership(
                &connected,
                self.requests.values().map(|r| r.live_hosts.as_slice()),
                self.requests.values().map(|r| r.restore_done),
                self.identity.restore_done,
            );
        self.conclude(failure)
    }

    fn conclude(&mut self, failure: JoinFailure) -> Vec<RejoinAction> {
        let (command, result) = match self.requests.values().next() {
            Some(first) if failure.is_empty() => {
                self.phase = JoinPhase::Complete;
                info!(host_id = first.assigned.0, members = self.requests.len(), "rejoined mesh");
                let outcome = JoinOutcome {
                    host: first.assigned,
                    instance: first.instance.clone(),
                    initial_txn_id: first.initial_txn_id,
                    peers: self.requests.keys().copied().collect(),
                };
                (Command::Complete, Ok(outcome))
            },
            _ => {
                let failure =
                    if failure.is_empty() { JoinFailure::FAULT_MISMATCH } else { failure };
                self.phase = JoinPhase::Failed;
                error!(bits = failure.bits(), ?failure, "rejoin rejected");
                (Command::JoinFail(failure), Err(failure))
            },
        };

        let mut actions: Vec<RejoinAction> = self
            .requests
            .keys()
            .map(|&to| RejoinAction::Send { to, command: command.clone() })
            .collect();
        actions.push(RejoinAction::Finished(result));
        actions
    }
}
