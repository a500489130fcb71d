//! Fault handler that records instead of acting.

use meshbus_core::{FaultHandler, HostId, NodeFault};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Records every fault and crash request for later assertions.
#[derive(Debug, Default)]
pub struct RecordingFaults {
    faults: Mutex<Vec<NodeFault>>,
    crashes: Mutex<Vec<String>>,
    changed: Notify,
}

impl RecordingFaults {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host failures reported so far.
    pub fn faults(&self) -> Vec<NodeFault> {
        self.faults.lock().clone()
    }

    /// Failures reported for `host`.
    pub fn faults_for(&self, host: HostId) -> Vec<NodeFault> {
        self.faults.lock().iter().filter(|fault| fault.failed == host).copied().collect()
    }

    /// Crash reasons received so far.
    pub fn crashes(&self) -> Vec<String> {
        self.crashes.lock().clone()
    }

    /// Wait until `done` holds.
    pub async fn wait_until(&self, done: impl Fn(&Self) -> bool) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if done(self) {
                return;
            }
            changed.await;
        }
    }
}

impl FaultHandler for RecordingFaults {
    fn host_failed(&self, fault: NodeFault) {
        tracing::info!(%fault, "fault recorded");
        self.faults.lock().push(fault);
        self.changed.notify_waiters();
    }

    fn crash(&self, reason: &str) {
        tracing::info!(reason, "crash recorded");
        self.crashes.lock().push(reason.to_owned());
        self.changed.notify_waiters();
    }
}
