//! Cross-process mutual exclusion for scheduled jobs.
//!
//! Several application instances may fire the same scheduled job at once. A
//! `DistributedLock` lets exactly one of them run it; the others observe
//! `None` from `acquire` and report "another run in progress".
//!
//! The lock is advisory. A holder that outlives `ttl` without finishing is
//! considered dead and its lock is reclaimed; there is no heartbeat renewal,
//! so jobs must finish well within `ttl`.

mod file;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use file::FileLock;

/// Acquisition parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Age after which an existing lock is treated as abandoned.
    pub ttl: Duration,
    /// How long to keep retrying while the lock is held elsewhere.
    pub wait: Duration,
    /// Delay between retries.
    pub poll: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
            wait: Duration::ZERO,
            poll: Duration::from_millis(250),
        }
    }
}

impl LockOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }
}

/// Proof of ownership returned by a successful `acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    pub path: PathBuf,
    pub token: Uuid,
    pub created_at: DateTime<Utc>,
    pub pid: u32,
    pub hostname: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock file serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take `key`. `Ok(None)` means another holder kept it for the
    /// whole `wait` window; that is not an error.
    async fn acquire(&self, key: &str, options: &LockOptions) -> Result<Option<LockHandle>, LockError>;

    /// Release a lock previously returned by `acquire`.
    ///
    /// Returns `false` when the lock is no longer ours (reclaimed as stale and
    /// taken by someone else, or already gone).
    async fn release(&self, handle: LockHandle) -> Result<bool, LockError>;
}
