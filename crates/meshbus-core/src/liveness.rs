//! Dead host detection.
//!
//! Detection happens on send rather than on a timer. Every inbound frame
//! refreshes the last-seen time; every outbound send asks [`HostLiveness`]
//! whether the host has been silent longer than the dead-host timeout. The
//! first overdue send raises a fault and marks the host down. A host goes
//! from up to down exactly once per incarnation, whichever path notices
//! first (overdue send, lost connection or explicit close).

use std::time::{Duration, Instant};

/// Liveness state of one foreign host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Connected and heard from recently
    Up,
    /// Being closed locally; no faults are raised
    Closing,
    /// Declared failed
    Down,
}

/// Outcome of checking a host before sending to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendVerdict {
    /// Host is healthy; send the frame
    Proceed,
    /// Host just crossed the dead-host timeout; raise one fault and drop the
    /// frame
    RaiseFault {
        /// Time since the last inbound frame
        silence: Duration,
    },
    /// Host is already down or closing; drop the frame silently
    Suppressed,
}

/// Tracks last-seen time and up/down state for one foreign host.
#[derive(Debug, Clone)]
pub struct HostLiveness {
    state: HostState,
    last_seen: Instant,
    timeout: Duration,
}

impl HostLiveness {
    /// A host that was heard from at `now`.
    pub fn new(now: Instant, timeout: Duration) -> Self {
        Self { state: HostState::Up, last_seen: now, timeout }
    }

    /// Current state.
    pub fn state(&self) -> HostState {
        self.state
    }

    /// True while the host is up.
    pub fn is_up(&self) -> bool {
        self.state == HostState::Up
    }

    /// Time of the last inbound frame.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// An inbound frame arrived.
    pub fn record_inbound(&mut self, now: Instant) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// Check before sending at `now`.
    pub fn on_send(&mut self, now: Instant) -> SendVerdict {
        if self.state != HostState::Up {
            return SendVerdict::Suppressed;
        }
        let silence = now.saturating_duration_since(self.last_seen);
        if silence > self.timeout {
            self.state = HostState::Down;
            return SendVerdict::RaiseFault { silence };
        }
        SendVerdict::Proceed
    }

    /// Declare the host down. Returns true only on the transition from up.
    pub fn mark_down(&mut self) -> bool {
        let was_up = self.is_up();
        if self.state != HostState::Closing {
            self.state = HostState::Down;
        }
        was_up
    }

    /// Begin a local close. Returns true only on the transition from up.
    pub fn mark_closing(&mut self) -> bool {
        let was_up = self.is_up();
        if was_up {
            self.state = HostState::Closing;
        }
        was_up
    }
}
