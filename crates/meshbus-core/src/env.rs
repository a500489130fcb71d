//! Time abstraction.
//!
//! Liveness and bootstrap logic never read clocks directly. Production uses
//! [`SystemEnv`]; simulations supply virtual time and can skew the wall clock
//! per host to exercise the clock-skew check.

use std::{
    future::Future,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Source of time for drivers and state machines.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic time. Used for liveness deltas only.
    fn now(&self) -> Instant;

    /// Wall clock in milliseconds since the Unix epoch. Used for the
    /// cluster-wide clock skew check and instance ids.
    fn wall_clock_millis(&self) -> i64;

    /// Sleep for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real clocks and Tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
