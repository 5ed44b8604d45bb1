//! HTTP resilience layer: retry with backoff + jitter, and a circuit breaker.
//!
//! One `HttpGuard` per remote dependency (token endpoint, order lookup,
//! webhook management). Each guard owns its own `CircuitState`; nothing is
//! shared between guards.
//!
//! ## Failure classes
//!
//! - `Retryable`: no response, timeouts, 408, 429, 5xx. Retried with backoff;
//!   an exhausted call counts one failure toward the circuit.
//! - `Connectivity`: connection could not be established. Not retried, but
//!   counts one failure toward the circuit.
//! - `Auth`: 401/403. Returned as is; the caller refreshes credentials.
//! - `Rejected`: any other 4xx or an unreadable payload. Returned as is and
//!   never counted, so a flood of bad input cannot open the circuit.

mod circuit;
mod policy;

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use circuit::CircuitState;
pub use policy::{CircuitPolicy, GuardConfig, RetryPolicy};

/// How a failed remote call should be treated by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retryable,
    Connectivity,
    Auth,
    Rejected,
}

/// Errors the guard can reason about.
pub trait Classify {
    fn disposition(&self) -> Disposition;
}

/// Error returned from a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    #[error("circuit '{key}' is open (retry in {remaining:?})")]
    CircuitOpen { key: String, remaining: Duration },

    #[error("{0}")]
    Remote(E),
}

impl<E> GuardError<E> {
    pub fn remote(&self) -> Option<&E> {
        match self {
            GuardError::Remote(e) => Some(e),
            GuardError::CircuitOpen { .. } => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen { .. })
    }
}

/// Retry + circuit breaker around one remote dependency.
#[derive(Debug)]
pub struct HttpGuard {
    key: String,
    config: GuardConfig,
    state: Mutex<CircuitState>,
}

impl HttpGuard {
    pub fn new(key: impl Into<String>, config: GuardConfig) -> Self {
        Self {
            key: key.into(),
            config,
            state: Mutex::new(CircuitState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Copy of the current circuit state.
    pub fn snapshot(&self) -> CircuitState {
        self.lock_state().clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock_state().open_for(Instant::now()).is_some()
    }

    /// Run `call` under the guard's retry and circuit policies.
    ///
    /// `call` performs exactly one remote request per invocation. It is not
    /// invoked at all while the circuit is open.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        if let Some(remaining) = self.lock_state().open_for(Instant::now()) {
            debug!(guard = %self.key, operation, ?remaining, "circuit open, call refused");
            return Err(GuardError::CircuitOpen {
                key: self.key.clone(),
                remaining,
            });
        }

        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match call().await {
                Ok(value) => {
                    self.record_success(operation);
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.disposition() {
                Disposition::Retryable if retry.should_retry(attempt) => {
                    let delay = retry.backoff(attempt);
                    debug!(
                        guard = %self.key,
                        operation,
                        attempt,
                        ?delay,
                        error = %err,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Disposition::Retryable | Disposition::Connectivity => {
                    warn!(guard = %self.key, operation, attempt, error = %err, "remote call failed");
                    self.record_failure(operation);
                    return Err(GuardError::Remote(err));
                }
                Disposition::Auth | Disposition::Rejected => {
                    return Err(GuardError::Remote(err));
                }
            }
        }
    }

    fn record_success(&self, operation: &str) {
        let mut state = self.lock_state();
        if state.opened_until.is_some() || state.consecutive_failures > 0 {
            info!(guard = %self.key, operation, "remote call recovered, circuit reset");
        }
        state.record_success();
    }

    fn record_failure(&self, operation: &str) {
        let mut state = self.lock_state();
        if state.record_failure(Instant::now(), &self.config.circuit) {
            warn!(
                guard = %self.key,
                operation,
                cooldown = ?self.config.circuit.cooldown,
                "circuit opened"
            );
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CircuitState> {
        // A poisoned lock only means a panic elsewhere; the counters stay usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
