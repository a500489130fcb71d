//! Cluster identifiers.
//!
//! Hosts are numbered from zero in the order the bootstrap coordinator admits
//! them. Sites are numbered per host: a site id is
//! `host * SITES_TO_HOST_DIVISOR + local_index`, so any site id names its host
//! without a lookup.

use std::fmt;

/// Multiplier separating a site's host from its local index.
pub const SITES_TO_HOST_DIVISOR: i32 = 100;

/// Cluster member process, assigned once per incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub i32);

impl HostId {
    /// Bootstrap coordinator of a freshly formed cluster.
    pub const COORDINATOR: Self = Self(0);

    /// Site on this host with the given local index.
    pub fn site(self, local_index: i32) -> SiteId {
        SiteId::new(self, local_index)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

/// Execution unit (partition replica) within a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId(pub i32);

impl SiteId {
    /// Compose a site id from its host and local index.
    pub fn new(host: HostId, local_index: i32) -> Self {
        Self(host.0 * SITES_TO_HOST_DIVISOR + local_index)
    }

    /// Host the site runs on.
    pub fn host(self) -> HostId {
        HostId(self.0 / SITES_TO_HOST_DIVISOR)
    }

    /// Index of the site within its host.
    pub fn local_index(self) -> i32 {
        self.0 % SITES_TO_HOST_DIVISOR
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site-{}:{}", self.host().0, self.local_index())
    }
}

/// Logical delivery sink within a site.
///
/// Non-negative ids are application mailboxes. Negative ids are reserved for
/// the transport control channel and never name a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MailboxId(pub i32);

impl MailboxId {
    /// True if the id can be registered by an application.
    pub fn is_application(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mailbox-{}", self.0)
    }
}

/// Combined host and site address used by higher-level messages.
///
/// The host occupies the low 32 bits and the site the high 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HsId(pub i64);

impl HsId {
    /// Pack a host and site.
    pub fn new(host: HostId, site: SiteId) -> Self {
        Self((i64::from(site.0) << 32) | i64::from(host.0 as u32))
    }

    /// HSId of a site on its own host.
    pub fn for_site(site: SiteId) -> Self {
        Self::new(site.host(), site)
    }

    /// Host half.
    pub fn host(self) -> HostId {
        HostId(self.0 as i32)
    }

    /// Site half.
    pub fn site(self) -> SiteId {
        SiteId((self.0 >> 32) as i32)
    }
}

impl fmt::Display for HsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.site(), self.host())
    }
}
