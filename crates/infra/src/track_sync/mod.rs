//! Track sync engine.
//!
//! Pulls the courier's view of every candidate shipment and writes back only
//! what changed. One run:
//!
//! ```text
//! acquire lock -> list candidates -> fetch token
//!   -> [per track: rate-limited fetch -> diff -> conditional write]
//!   -> release lock
//! ```
//!
//! Per-track failures never abort the batch. The lock is released on every
//! path out of a run, including worker panics.

mod worker;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use shipsync_core::{ShipmentRecord, SyncMode, SyncResult, TrackNumber, TrackOutcome};

use crate::courier::{CourierApi, TokenProvider};
use crate::http_guard::HttpGuard;
use crate::job_lock::{DistributedLock, LockError, LockOptions};
use crate::rate_limit::RateLimiter;
use crate::store::{CandidateFilter, ShipmentStore, StoreError};

use worker::TrackWorker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSyncConfig {
    /// CRM delivery method that identifies courier shipments.
    pub delivery_method: String,
    pub concurrency: usize,
    pub fast_concurrency: usize,
    /// Minimum spacing between courier call starts.
    pub min_interval: Duration,
    pub fast_min_interval: Duration,
    pub lock_key: String,
    pub lock: LockOptions,
}

impl Default for TrackSyncConfig {
    fn default() -> Self {
        Self {
            delivery_method: "courier".to_string(),
            concurrency: 3,
            fast_concurrency: 8,
            min_interval: Duration::from_millis(150),
            fast_min_interval: Duration::ZERO,
            lock_key: "track-sync".to_string(),
            lock: LockOptions::default(),
        }
    }
}

impl TrackSyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.delivery_method.trim().is_empty() {
            return Err(SyncError::Config("delivery method must not be empty".into()));
        }
        if self.concurrency == 0 || self.fast_concurrency == 0 {
            return Err(SyncError::Config("concurrency must be at least 1".into()));
        }
        if self.lock_key.trim().is_empty() {
            return Err(SyncError::Config("lock key must not be empty".into()));
        }
        Ok(())
    }
}

/// Per-invocation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Use the fast concurrency/pacing profile.
    pub fast: bool,
    pub limit: Option<usize>,
}

impl SyncOptions {
    pub fn full() -> Self {
        Self {
            mode: SyncMode::Full,
            ..Default::default()
        }
    }

    pub fn delta() -> Self {
        Self {
            mode: SyncMode::Delta,
            ..Default::default()
        }
    }

    pub fn fast(mut self) -> Self {
        self.fast = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid sync configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TrackSyncEngine {
    config: TrackSyncConfig,
    store: Arc<dyn ShipmentStore>,
    courier: Arc<dyn CourierApi>,
    tokens: Arc<TokenProvider>,
    guard: Arc<HttpGuard>,
    lock: Arc<dyn DistributedLock>,
    limiter: Arc<RateLimiter>,
    fast_limiter: Arc<RateLimiter>,
}

impl TrackSyncEngine {
    /// `guard` protects order lookups; the token provider brings its own.
    pub fn new(
        config: TrackSyncConfig,
        store: Arc<dyn ShipmentStore>,
        courier: Arc<dyn CourierApi>,
        tokens: Arc<TokenProvider>,
        guard: Arc<HttpGuard>,
        lock: Arc<dyn DistributedLock>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.min_interval));
        let fast_limiter = Arc::new(RateLimiter::new(config.fast_min_interval));
        Self {
            config,
            store,
            courier,
            tokens,
            guard,
            lock,
            limiter,
            fast_limiter,
        }
    }

    pub fn config(&self) -> &TrackSyncConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenProvider> {
        &self.tokens
    }

    /// Run one sync over all candidates.
    ///
    /// Returns `SyncResult { locked: true, .. }` when another run holds the
    /// lock.
    #[instrument(skip(self), fields(mode = options.mode.as_str(), fast = options.fast))]
    pub async fn sync_tracks(&self, options: SyncOptions) -> Result<SyncResult, SyncError> {
        self.config.validate()?;
        let started = std::time::Instant::now();

        let Some(handle) = self.lock.acquire(&self.config.lock_key, &self.config.lock).await? else {
            info!(lock_key = %self.config.lock_key, "track sync already running elsewhere");
            return Ok(SyncResult::locked(options.mode));
        };

        let outcome = self.run_locked(&options).await;

        match self.lock.release(handle).await {
            Ok(true) => {}
            Ok(false) => warn!(lock_key = %self.config.lock_key, "sync lock was lost before release"),
            Err(e) => warn!(lock_key = %self.config.lock_key, error = %e, "failed to release sync lock"),
        }

        let mut result = outcome?;
        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            tracks_total = result.tracks_total,
            updated = result.updated,
            skipped = result.skipped,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "track sync finished"
        );
        Ok(result)
    }

    /// Sync one track outside the batch (inbound push). Takes no lock.
    pub async fn sync_single(&self, track: &TrackNumber) -> Result<TrackOutcome, SyncError> {
        let Some(record) = self.store.find_by_track(track).await? else {
            return Ok(TrackOutcome::Skipped {
                reason: "track not tracked locally".to_string(),
            });
        };
        if record.delivery_method != self.config.delivery_method {
            return Ok(TrackOutcome::Skipped {
                reason: format!("delivery method {} is not synced", record.delivery_method),
            });
        }

        let outcome = self.worker(false).sync_record(record).await;
        info!(track = %track, ?outcome, "single track synced");
        Ok(outcome)
    }

    async fn run_locked(&self, options: &SyncOptions) -> Result<SyncResult, SyncError> {
        let filter = CandidateFilter {
            delivery_method: self.config.delivery_method.clone(),
            only_undelivered: options.mode == SyncMode::Delta,
            limit: options.limit,
        };
        let listed = self.store.list_candidates(&filter).await?;
        for track in &listed.unreadable {
            warn!(track = %track, "shipment row unreadable, counting as failed");
        }
        let unreadable = listed.unreadable.len();
        let candidates = dedupe(listed.records);
        let total = candidates.len();
        let mut result = SyncResult::new(options.mode, total + unreadable);
        result.failed = unreadable;
        if total == 0 {
            return Ok(result);
        }

        if let Err(e) = self.tokens.current().await {
            error!(error = %e, tracks = total, "cannot obtain courier token, failing run");
            result.failed += total;
            return Ok(result);
        }

        let concurrency = if options.fast {
            self.config.fast_concurrency
        } else {
            self.config.concurrency
        };
        let worker = Arc::new(self.worker(options.fast));
        let queue = Arc::new(Mutex::new(VecDeque::from(candidates)));
        let tally = Arc::new(Mutex::new(SyncResult::new(options.mode, total)));

        let mut workers = JoinSet::new();
        for _ in 0..concurrency.min(total) {
            let worker = worker.clone();
            let queue = queue.clone();
            let tally = tally.clone();
            workers.spawn(async move {
                loop {
                    let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                    let Some(record) = next else { break };
                    let outcome = worker.sync_record(record).await;
                    if let Ok(mut tally) = tally.lock() {
                        tally.record(&outcome);
                    }
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "sync worker terminated abnormally");
            }
        }

        let mut settled = SyncResult::new(options.mode, total);
        if let Ok(tally) = tally.lock() {
            settled = tally.clone();
        }
        // Tracks lost with a panicked worker (or never dequeued) count as failed.
        let accounted = settled.updated + settled.skipped + settled.failed;
        result.updated = settled.updated;
        result.skipped = settled.skipped;
        result.failed += settled.failed + total.saturating_sub(accounted);
        Ok(result)
    }

    fn worker(&self, fast: bool) -> TrackWorker {
        TrackWorker {
            store: self.store.clone(),
            courier: self.courier.clone(),
            tokens: self.tokens.clone(),
            guard: self.guard.clone(),
            limiter: if fast {
                self.fast_limiter.clone()
            } else {
                self.limiter.clone()
            },
        }
    }
}

/// Drop repeated tracks, keeping the first occurrence.
fn dedupe(records: Vec<ShipmentRecord>) -> Vec<ShipmentRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.track.clone()))
        .collect()
}
