//! Local delivery.
//!
//! A mailbox is bound to one `(site, mailbox id)` pair for the life of the
//! site. [`SiteMailbox`] queues messages per [`Subject`] for worker threads
//! that block on receive; [`LocalMailbox`] hands each message to a callback
//! on the delivering thread. The [`MailboxRegistry`] routes inbound frames and
//! local sends to them.
//!
//! Delivery takes only the target mailbox's own lock, so the transport's
//! reader never waits on anything but the mailbox it is delivering into.
//!
//! [`Subject`]: meshbus_proto::Subject

mod local;
mod registry;
mod site;

pub use local::LocalMailbox;
use meshbus_proto::Message;
pub use registry::MailboxRegistry;
pub use site::SiteMailbox;

/// A delivery sink.
pub trait Mailbox: Send + Sync {
    /// Deliver in arrival order, or ahead of queued messages for priority
    /// messages.
    fn deliver(&self, message: Message);

    /// Deliver ahead of everything already queued for the message's subject.
    fn deliver_front(&self, message: Message);
}
