//! Subject-prioritized blocking mailbox.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use meshbus_proto::{MailboxId, Message, SiteId, Subject};
use parking_lot::{Condvar, Mutex};

use super::Mailbox;

type Queues = [VecDeque<Message>; Subject::COUNT];

/// Per-subject FIFO queues consumed by a site's worker thread.
///
/// Receivers name the subjects they want in priority order; the default order
/// ([`Subject::PRIORITY_ORDER`]) drains failure notices before ordinary
/// traffic. Messages of one subject are received in delivery order, except
/// those delivered to the front.
#[derive(Debug)]
pub struct SiteMailbox {
    site: SiteId,
    id: MailboxId,
    queues: Mutex<Queues>,
    available: Condvar,
}

fn pop(queues: &mut Queues, subjects: &[Subject]) -> Option<Message> {
    subjects.iter().find_map(|subject| queues[subject.index()].pop_front())
}

impl SiteMailbox {
    /// Empty mailbox bound to `(site, id)`.
    pub fn new(site: SiteId, id: MailboxId) -> Self {
        Self { site, id, queues: Mutex::new(Default::default()), available: Condvar::new() }
    }

    /// Owning site.
    pub fn site(&self) -> SiteId {
        self.site
    }

    /// Mailbox id.
    pub fn id(&self) -> MailboxId {
        self.id
    }

    /// Next message in default priority order, if any.
    pub fn recv(&self) -> Option<Message> {
        self.recv_subjects(&Subject::PRIORITY_ORDER)
    }

    /// Next message from the first non-empty subject in `subjects`.
    pub fn recv_subjects(&self, subjects: &[Subject]) -> Option<Message> {
        pop(&mut self.queues.lock(), subjects)
    }

    /// Block until a message is available, in default priority order.
    pub fn recv_blocking(&self) -> Message {
        self.recv_blocking_subjects(&Subject::PRIORITY_ORDER)
    }

    /// Block until a message of one of `subjects` is available.
    pub fn recv_blocking_subjects(&self, subjects: &[Subject]) -> Message {
        let mut queues = self.queues.lock();
        loop {
            if let Some(message) = pop(&mut queues, subjects) {
                return message;
            }
            self.available.wait(&mut queues);
        }
    }

    /// Block for at most `timeout`, in default priority order.
    pub fn recv_blocking_timeout(&self, timeout: Duration) -> Option<Message> {
        self.recv_blocking_timeout_subjects(&Subject::PRIORITY_ORDER, timeout)
    }

    /// Block for at most `timeout` for a message of one of `subjects`.
    pub fn recv_blocking_timeout_subjects(
        &self,
        subjects: &[Subject],
        timeout: Duration,
    ) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        loop {
            if let Some(message) = pop(&mut queues, subjects) {
                return Some(message);
            }
            if self.available.wait_until(&mut queues, deadline).timed_out() {
                return pop(&mut queues, subjects);
            }
        }
    }

    /// Messages queued across all subjects.
    pub fn len(&self) -> usize {
        self.queues.lock().iter().map(VecDeque::len).sum()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages queued for one subject.
    pub fn len_of(&self, subject: Subject) -> usize {
        self.queues.lock()[subject.index()].len()
    }

    fn push(&self, message: Message, front: bool) {
        let mut queues = self.queues.lock();
        let queue = &mut queues[message.subject().index()];
        if front {
            queue.push_front(message);
        } else {
            queue.push_back(message);
        }
        drop(queues);
        self.available.notify_one();
    }
}

impl Mailbox for SiteMailbox {
    fn deliver(&self, message: Message) {
        let front = message.is_priority();
        self.push(message, front);
    }

    fn deliver_front(&self, message: Message) {
        self.push(message, true);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use meshbus_proto::{
        HostId,
        payloads::{FailureSiteUpdate, Heartbeat, HostFailureNotice},
    };
    use proptest::prelude::*;

    use super::*;

    fn beat(txn_id: i64) -> Message {
        Heartbeat { txn_id, last_safe_txn_id: 0 }.into()
    }

    fn update(safe_txn_id: i64) -> Message {
        FailureSiteUpdate {
            failed_host: HostId(1),
            initiator: SiteId(0),
            safe_txn_id,
            committed_txn_id: 0,
        }
        .into()
    }

    fn mailbox() -> SiteMailbox {
        SiteMailbox::new(SiteId(100), MailboxId(1))
    }

    #[test]
    fn same_subject_is_fifo() {
        let mailbox = mailbox();
        mailbox.deliver(beat(1));
        mailbox.deliver(beat(2));
        assert_eq!(mailbox.recv(), Some(beat(1)));
        assert_eq!(mailbox.recv(), Some(beat(2)));
        assert_eq!(mailbox.recv(), None);
    }

    #[test]
    fn failure_subjects_drain_first() {
        let mailbox = mailbox();
        mailbox.deliver(beat(1));
        mailbox.deliver(update(7));
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.len_of(Subject::FailureSiteUpdate), 1);

        assert_eq!(mailbox.recv(), Some(update(7)));
        assert_eq!(mailbox.recv(), Some(beat(1)));
    }

    #[test]
    fn host_failure_notice_preempts_everything() {
        let notice: Message =
            HostFailureNotice { failed_host: HostId(2), detected_by: HostId(0), rejoinable: true }
                .into();
        let mailbox = mailbox();
        mailbox.deliver(beat(1));
        mailbox.deliver(update(3));
        mailbox.deliver(notice.clone());
        assert_eq!(mailbox.len_of(Subject::Failure), 1);

        assert_eq!(mailbox.recv(), Some(notice));
        assert_eq!(mailbox.recv(), Some(update(3)));
        assert_eq!(mailbox.recv(), Some(beat(1)));
    }

    #[test]
    fn caller_chooses_subjects() {
        let mailbox = mailbox();
        mailbox.deliver(update(7));
        assert_eq!(mailbox.recv_subjects(&[Subject::Default]), None);
        assert_eq!(mailbox.recv_subjects(&[Subject::Default, Subject::FailureSiteUpdate]), Some(update(7)));
    }

    #[test]
    fn priority_messages_jump_their_queue() {
        let mailbox = mailbox();
        mailbox.deliver(update(1));
        mailbox.deliver(update(2));
        assert_eq!(mailbox.recv(), Some(update(2)));

        mailbox.deliver(beat(1));
        mailbox.deliver_front(beat(2));
        assert_eq!(mailbox.recv(), Some(update(1)));
        assert_eq!(mailbox.recv(), Some(beat(2)));
        assert_eq!(mailbox.recv(), Some(beat(1)));
    }

    #[test]
    fn blocking_receive_wakes_on_delivery() {
        let mailbox = Arc::new(mailbox());
        let consumer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || mailbox.recv_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.deliver(beat(9));
        assert_eq!(consumer.join().unwrap(), beat(9));
    }

    #[test]
    fn blocking_timeout_expires_empty() {
        let mailbox = mailbox();
        assert_eq!(mailbox.recv_blocking_timeout(Duration::from_millis(10)), None);
        mailbox.deliver(beat(1));
        assert_eq!(mailbox.recv_blocking_timeout(Duration::from_millis(10)), Some(beat(1)));
    }

    proptest! {
        #[test]
        fn delivery_order_is_preserved(txns in prop::collection::vec(any::<i64>(), 0..64)) {
            let mailbox = mailbox();
            for txn in &txns {
                mailbox.deliver(beat(*txn));
            }
            let received: Vec<Message> = std::iter::from_fn(|| mailbox.recv()).collect();
            let expected: Vec<Message> = txns.iter().copied().map(beat).collect();
            prop_assert_eq!(received, expected);
        }
    }
}
