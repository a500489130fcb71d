//! Virtual time for simulated hosts.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use meshbus_core::Environment;

/// Wall clock reading of every simulated host at simulation start, before skew.
pub const SIM_EPOCH_MILLIS: i64 = 1_700_000_000_000;

/// Environment backed by Turmoil's virtual clock.
///
/// Monotonic time is Tokio's, which Turmoil advances per step. The wall clock
/// is [`SIM_EPOCH_MILLIS`] plus elapsed simulation time plus a fixed per-host
/// skew, so clock-skew checks can be driven deterministically.
#[derive(Debug, Clone, Copy)]
pub struct SimEnv {
    skew_ms: i64,
}

impl SimEnv {
    /// Environment with an accurate wall clock.
    pub fn new() -> Self {
        Self::with_skew(0)
    }

    /// Environment whose wall clock runs `skew_ms` ahead (or behind, if
    /// negative).
    pub fn with_skew(skew_ms: i64) -> Self {
        Self { skew_ms }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn wall_clock_millis(&self) -> i64 {
        let elapsed = turmoil::sim_elapsed().unwrap_or_default();
        let elapsed = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        SIM_EPOCH_MILLIS.saturating_add(elapsed).saturating_add(self.skew_ms)
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
