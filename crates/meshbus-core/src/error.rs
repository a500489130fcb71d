//! Error types for the sans-IO core.

use meshbus_proto::{HostId, MailboxId, SiteId};
use thiserror::Error;

use crate::join::JoinPhase;

/// Join state machine misuse or protocol violation.
///
/// Any of these during bootstrap is fatal to the bootstrap attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// Control message not valid in the current phase
    #[error("unexpected control code {code} in phase {phase:?}")]
    Unexpected {
        /// Phase the machine was in
        phase: JoinPhase,
        /// Offending control code
        code: i32,
    },

    /// Message came from a host the machine is not waiting on
    #[error("unexpected message from host {host}")]
    UnexpectedHost {
        /// Sender
        host: HostId,
    },

    /// More followers connected than the cluster size allows
    #[error("cluster already has {expected} hosts")]
    TooManyHosts {
        /// Configured cluster size
        expected: usize,
    },

    /// Rejoin requests disagree on the cluster they describe
    #[error("rejoin request from host {member} conflicts with earlier requests")]
    ConflictingRejoin {
        /// Member whose request conflicts
        member: HostId,
    },

    /// Operation called after the machine finished
    #[error("join already finished")]
    Finished,
}

/// Mailbox registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// A mailbox is already bound to this site and id
    #[error("mailbox {mailbox} already registered on site {site}")]
    AlreadyRegistered {
        /// Site
        site: SiteId,
        /// Mailbox id
        mailbox: MailboxId,
    },
}
