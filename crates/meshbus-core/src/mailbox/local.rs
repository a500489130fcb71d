//! Callback mailbox.

use std::fmt;

use meshbus_proto::Message;

use super::Mailbox;

type Callback = Box<dyn Fn(Message) + Send + Sync>;

/// Mailbox that runs a callback on the delivering thread instead of queueing.
///
/// The callback must not block: it runs on the transport's reader for the
/// sending host.
pub struct LocalMailbox {
    callback: Callback,
}

impl LocalMailbox {
    /// Wrap `callback`.
    pub fn new(callback: impl Fn(Message) + Send + Sync + 'static) -> Self {
        Self { callback: Box::new(callback) }
    }
}

impl Mailbox for LocalMailbox {
    fn deliver(&self, message: Message) {
        (self.callback)(message);
    }

    fn deliver_front(&self, message: Message) {
        (self.callback)(message);
    }
}

impl fmt::Debug for LocalMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMailbox").finish_non_exhaustive()
    }
}
