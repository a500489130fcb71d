//! Delivery subjects.

/// Priority class used only by local mailbox queues.
///
/// Subjects never influence wire routing. A mailbox keeps one FIFO per subject
/// and receivers drain subjects in the order they ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    /// Ordinary transaction traffic
    Default = 0,
    /// Node failure notices
    Failure = 1,
    /// Failure agreement updates exchanged between surviving sites
    FailureSiteUpdate = 2,
}

impl Subject {
    /// Number of subjects; mailboxes allocate one queue each.
    pub const COUNT: usize = 3;

    /// Failure signalling first, then ordinary traffic.
    pub const PRIORITY_ORDER: [Self; Self::COUNT] =
        [Self::Failure, Self::FailureSiteUpdate, Self::Default];

    /// Queue index for this subject.
    pub fn index(self) -> usize {
        self as usize
    }
}
