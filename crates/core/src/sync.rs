//! Sync run accounting.

use serde::{Deserialize, Serialize};

/// Which slice of shipments a sync run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every courier shipment.
    #[default]
    Full,
    /// Only shipments that have not reached a terminal status.
    Delta,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Delta => "delta",
        }
    }
}

/// What happened to a single track during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// A conditional write was issued for the listed fields.
    Updated { changed: Vec<&'static str> },
    /// Remote state matches the stored record.
    Unchanged,
    /// Upstream does not recognise the track (or the track is not ours).
    Skipped { reason: String },
    Failed { error: String },
}

/// Aggregate result of one sync invocation.
///
/// Always populated, including when the run was skipped because another
/// instance holds the lock (`locked == true`, all counters zero).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub mode: SyncMode,
    pub tracks_total: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub locked: bool,
    pub duration_ms: u64,
}

impl SyncResult {
    pub fn new(mode: SyncMode, tracks_total: usize) -> Self {
        Self {
            mode,
            tracks_total,
            ..Default::default()
        }
    }

    /// Result for a run that did not start because the lock was held elsewhere.
    pub fn locked(mode: SyncMode) -> Self {
        Self {
            mode,
            locked: true,
            ..Default::default()
        }
    }

    /// Fold one track outcome into the counters. Unchanged tracks count as skipped.
    pub fn record(&mut self, outcome: &TrackOutcome) {
        match outcome {
            TrackOutcome::Updated { .. } => self.updated += 1,
            TrackOutcome::Unchanged | TrackOutcome::Skipped { .. } => self.skipped += 1,
            TrackOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Share of failed tracks in `[0.0, 1.0]`; zero for an empty run.
    pub fn failure_rate(&self) -> f64 {
        if self.tracks_total == 0 {
            return 0.0;
        }
        self.failed as f64 / self.tracks_total as f64
    }
}
