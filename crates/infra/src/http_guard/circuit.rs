//! Per-guard circuit state.

use std::time::Duration;

use tokio::time::Instant;

use super::policy::CircuitPolicy;

/// Consecutive-failure counter plus the instant until which calls are refused.
///
/// Lives in memory only; a restart closes every circuit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitState {
    pub consecutive_failures: u32,
    pub opened_until: Option<Instant>,
}

impl CircuitState {
    /// Remaining open time, if the circuit refuses calls at `now`.
    pub fn open_for(&self, now: Instant) -> Option<Duration> {
        self.opened_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_until = None;
    }

    /// Count one failed call. Returns `true` when this failure opened the circuit.
    pub fn record_failure(&mut self, now: Instant, policy: &CircuitPolicy) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= policy.threshold.max(1) {
            self.opened_until = Some(now + policy.cooldown);
            self.consecutive_failures = 0;
            return true;
        }
        false
    }
}
