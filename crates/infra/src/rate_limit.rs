//! Minimum-spacing limiter for outbound call starts.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Leaky-bucket slot reservation: consecutive `acquire` calls return no
/// closer together than `min_interval`.
///
/// Callers are served in the order they reach the internal lock (tokio's
/// mutex is FIFO). The slot is reserved under the lock; the wait happens
/// outside it so later callers can queue their own reservation meanwhile.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until this caller's slot starts.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
