//! Per-track fetch, diff and conditional write.

use std::sync::Arc;

use tracing::debug;

use shipsync_core::{ShipmentRecord, TrackOutcome};

use crate::courier::{CourierApi, TokenProvider};
use crate::http_guard::{GuardError, HttpGuard};
use crate::rate_limit::RateLimiter;
use crate::store::ShipmentStore;

/// Everything one track needs; shared by all workers of a run.
pub(crate) struct TrackWorker {
    pub(crate) store: Arc<dyn ShipmentStore>,
    pub(crate) courier: Arc<dyn CourierApi>,
    pub(crate) tokens: Arc<TokenProvider>,
    pub(crate) guard: Arc<HttpGuard>,
    pub(crate) limiter: Arc<RateLimiter>,
}

impl TrackWorker {
    pub(crate) async fn sync_record(&self, record: ShipmentRecord) -> TrackOutcome {
        let courier = self.courier.clone();
        let limiter = self.limiter.clone();
        let track = record.track.clone();
        // Every attempt takes a slot, including guard retries and the retry
        // after a token refresh.
        let fetched = self
            .tokens
            .call_authorized(&self.guard, "order_by_track", |token| {
                let courier = courier.clone();
                let limiter = limiter.clone();
                let track = track.clone();
                async move {
                    limiter.acquire().await;
                    courier.order_by_track(&token, &track).await
                }
            })
            .await;

        let order = match fetched {
            Ok(order) => order,
            Err(GuardError::Remote(e)) if e.is_unknown_track() => {
                debug!(track = %record.track, error = %e, "courier does not know track, skipping");
                return TrackOutcome::Skipped { reason: e.to_string() };
            }
            Err(e) => {
                debug!(track = %record.track, error = %e, "track fetch failed");
                return TrackOutcome::Failed { error: e.to_string() };
            }
        };

        let patch = record.diff(&order.snapshot());
        if patch.is_empty() {
            debug!(track = %record.track, "track unchanged");
            return TrackOutcome::Unchanged;
        }

        match self.store.apply_patch(&record.track, &patch).await {
            Ok(true) => {
                let changed = patch.changed_fields();
                debug!(track = %record.track, ?changed, "track updated");
                TrackOutcome::Updated { changed }
            }
            // Someone else wrote the same values first.
            Ok(false) => TrackOutcome::Unchanged,
            Err(e) => TrackOutcome::Failed { error: e.to_string() },
        }
    }
}
