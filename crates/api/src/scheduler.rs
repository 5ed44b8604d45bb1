//! Interval driver for periodic syncs and webhook reconciliation.
//!
//! Each enabled job runs on its own task. The first run happens one interval
//! after start-up; a run that overlaps another instance's run is reported as
//! locked and simply skipped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use shipsync_infra::{ReconcileOptions, ScheduleConfig, SyncOptions};

use crate::app::AppServices;

/// Handle to the spawned loops.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SchedulerHandle {
    /// Names of the loops that are running.
    pub fn jobs(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Stop all loops. A run in progress is abandoned; its lock expires by TTL.
    pub fn shutdown(self) {
        for (_, task) in self.tasks {
            task.abort();
        }
    }
}

/// Spawn one loop per non-zero interval in `schedule`.
pub fn spawn(services: Arc<AppServices>, schedule: &ScheduleConfig) -> SchedulerHandle {
    let mut tasks = Vec::new();

    if !schedule.delta_interval.is_zero() {
        let services = services.clone();
        tasks.push((
            "delta-sync",
            every(schedule.delta_interval, "delta-sync", move || {
                run_sync(services.clone(), SyncOptions::delta())
            }),
        ));
    }

    if !schedule.full_interval.is_zero() {
        let services = services.clone();
        tasks.push((
            "full-sync",
            every(schedule.full_interval, "full-sync", move || {
                run_sync(services.clone(), SyncOptions::full())
            }),
        ));
    }

    if !schedule.reconcile_interval.is_zero() {
        let services = services.clone();
        tasks.push((
            "webhook-reconcile",
            every(schedule.reconcile_interval, "webhook-reconcile", move || {
                run_reconcile(services.clone())
            }),
        ));
    }

    info!(jobs = ?tasks.iter().map(|(n, _)| *n).collect::<Vec<_>>(), "scheduler started");
    SchedulerHandle { tasks }
}

fn every<F, Fut>(period: Duration, job: &'static str, mut run: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            info!(job, "scheduled run starting");
            run().await;
        }
    })
}

async fn run_sync(services: Arc<AppServices>, options: SyncOptions) {
    match services.sync.sync_tracks(options).await {
        Ok(result) => {
            services.alerts.inspect_sync_result(&result).await;
        }
        Err(e) => error!(mode = options.mode.as_str(), error = %e, "scheduled sync failed"),
    }
}

async fn run_reconcile(services: Arc<AppServices>) {
    // The delta loop covers syncing; reconcile only keeps the subscription alive.
    if let Err(e) = services
        .reconciler
        .reconcile(ReconcileOptions::default().skip_sync())
        .await
    {
        error!(error = %e, "scheduled webhook reconcile failed");
    }
}
