//! Mailbox registry.

use std::{collections::HashMap, sync::Arc};

use meshbus_proto::{EnvelopeHeader, MailboxId, Message, SiteId};
use parking_lot::RwLock;
use tracing::warn;

use super::{LocalMailbox, Mailbox, SiteMailbox};
use crate::error::MailboxError;

/// Routes messages to the mailboxes registered on this host.
///
/// Registration is rare and delivery is constant, so the table sits behind a
/// read-write lock that delivery only reads.
#[derive(Default)]
pub struct MailboxRegistry {
    mailboxes: RwLock<HashMap<(SiteId, MailboxId), Arc<dyn Mailbox>>>,
}

impl MailboxRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `mailbox` to `(site, id)`.
    pub fn register(
        &self,
        site: SiteId,
        id: MailboxId,
        mailbox: Arc<dyn Mailbox>,
    ) -> Result<(), MailboxError> {
        let mut mailboxes = self.mailboxes.write();
        if mailboxes.contains_key(&(site, id)) {
            return Err(MailboxError::AlreadyRegistered { site, mailbox: id });
        }
        mailboxes.insert((site, id), mailbox);
        Ok(())
    }

    /// Create and bind a queueing mailbox.
    pub fn register_site_mailbox(
        &self,
        site: SiteId,
        id: MailboxId,
    ) -> Result<Arc<SiteMailbox>, MailboxError> {
        let mailbox = Arc::new(SiteMailbox::new(site, id));
        self.register(site, id, Arc::clone(&mailbox) as Arc<dyn Mailbox>)?;
        Ok(mailbox)
    }

    /// Create and bind a callback mailbox.
    pub fn register_local_mailbox(
        &self,
        site: SiteId,
        id: MailboxId,
        callback: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<(), MailboxError> {
        self.register(site, id, Arc::new(LocalMailbox::new(callback)))
    }

    /// Remove the mailbox bound to `(site, id)`.
    pub fn unregister(&self, site: SiteId, id: MailboxId) -> Option<Arc<dyn Mailbox>> {
        self.mailboxes.write().remove(&(site, id))
    }

    /// Mailbox bound to `(site, id)`.
    pub fn get(&self, site: SiteId, id: MailboxId) -> Option<Arc<dyn Mailbox>> {
        self.mailboxes.read().get(&(site, id)).cloned()
    }

    /// Number of registered mailboxes.
    pub fn len(&self) -> usize {
        self.mailboxes.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to one mailbox. A missing mailbox drops the message with a
    /// warning and returns false.
    pub fn deliver(&self, site: SiteId, id: MailboxId, message: Message) -> bool {
        self.route(site, id, message, false)
    }

    /// Deliver ahead of queued messages of the same subject.
    pub fn deliver_front(&self, site: SiteId, id: MailboxId, message: Message) -> bool {
        self.route(site, id, message, true)
    }

    /// Deliver an inbound frame to each of its destination sites. Returns the
    /// number of mailboxes reached.
    pub fn deliver_envelope(&self, header: &EnvelopeHeader, message: Message) -> usize {
        let Some((last, rest)) = header.destinations.split_last() else {
            return 0;
        };
        let delivered =
            rest.iter().filter(|site| self.deliver(**site, header.mailbox, message.clone())).count();
        delivered + usize::from(self.deliver(*last, header.mailbox, message))
    }

    fn route(&self, site: SiteId, id: MailboxId, message: Message, front: bool) -> bool {
        let Some(mailbox) = self.get(site, id) else {
            warn!(%site, mailbox = %id, tag = ?message.tag(), "dropping message for missing mailbox");
            return false;
        };
        if front {
            mailbox.deliver_front(message);
        } else {
            mailbox.deliver(message);
        }
        true
    }
}
