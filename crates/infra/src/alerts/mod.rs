//! Operational alerts with persisted cooldowns.
//!
//! Alerts are keyed (`webhook-missing`, `sync-failed:delta`, ...). A key that
//! fired within `cooldown` is suppressed, and the last-fired times survive
//! restarts through `AlertStateStore`. The notifier is a silent no-op unless
//! it is enabled and has at least one destination.

mod state;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shipsync_core::SyncResult;

pub use state::{AlertState, AlertStateStore};
pub use transport::{AlertTransport, HttpAlertTransport, RecordingTransport};

pub const WEBHOOK_MISSING_KEY: &str = "webhook-missing";
pub const WEBHOOK_REGISTRATION_FAILED_KEY: &str = "webhook-registration-failed";

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert state io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("alert state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("alert delivery failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    pub enabled: bool,
    /// Incoming-webhook URLs that receive every alert.
    pub destinations: Vec<String>,
    pub cooldown: Duration,
    /// Consecutive "webhook missing" observations before alerting.
    pub webhook_missing_threshold: u32,
    pub sync_failed_abs: usize,
    pub sync_failed_rate: f64,
    /// Runs smaller than this are judged by `sync_failed_abs` only.
    pub sync_min_tracks_for_rate: usize,
    pub state_path: PathBuf,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destinations: Vec::new(),
            cooldown: Duration::from_secs(180 * 60),
            webhook_missing_threshold: 2,
            sync_failed_abs: 25,
            sync_failed_rate: 0.5,
            sync_min_tracks_for_rate: 10,
            state_path: std::env::temp_dir().join("shipsync-alert-state.json"),
        }
    }
}

impl AlertConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.destinations.is_empty()
    }
}

/// What happened to an alert evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDelivery {
    /// Notifier disabled or without destinations.
    Disabled,
    /// Conditions for alerting were not met.
    NotTriggered,
    /// Same key fired within the cooldown.
    Suppressed { remaining: Duration },
    Sent { delivered: usize, failed: usize },
    /// Every destination rejected the message; cooldown not recorded.
    Failed { errors: Vec<String> },
}

pub struct AlertNotifier {
    config: AlertConfig,
    transport: Arc<dyn AlertTransport>,
    store: AlertStateStore,
    // Serialises read-modify-write of the state file within this process.
    state_lock: Mutex<()>,
}

impl AlertNotifier {
    pub fn new(config: AlertConfig, transport: Arc<dyn AlertTransport>) -> Self {
        let store = AlertStateStore::new(config.state_path.clone());
        Self {
            config,
            transport,
            store,
            state_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    /// Send `text` under `key` unless the key is cooling down.
    pub async fn send_alert(&self, key: &str, text: &str) -> AlertDelivery {
        self.send_alert_at(key, text, Utc::now()).await
    }

    pub(crate) async fn send_alert_at(&self, key: &str, text: &str, now: DateTime<Utc>) -> AlertDelivery {
        if !self.is_active() {
            return AlertDelivery::Disabled;
        }
        let _guard = self.state_lock.lock().await;
        let mut state = self.store.load().await;
        self.deliver(&mut state, key, text, now).await
    }

    /// Track whether the order-status webhook was found.
    ///
    /// `missing` bumps the streak, presence resets it. Once the streak reaches
    /// the threshold an alert fires (subject to cooldown).
    pub async fn record_webhook_check(&self, missing: bool, created: bool) -> AlertDelivery {
        if !self.is_active() {
            return AlertDelivery::Disabled;
        }
        let _guard = self.state_lock.lock().await;
        let mut state = self.store.load().await;

        if !missing {
            if state.webhook_missing_streak != 0 {
                state.webhook_missing_streak = 0;
                self.store.save(&state).await;
            }
            return AlertDelivery::NotTriggered;
        }

        state.webhook_missing_streak = state.webhook_missing_streak.saturating_add(1);
        let streak = state.webhook_missing_streak;
        debug!(streak, created, "order-status webhook missing");

        if streak < self.config.webhook_missing_threshold {
            self.store.save(&state).await;
            return AlertDelivery::NotTriggered;
        }

        let text = if created {
            format!("Courier order-status webhook was missing {streak} checks in a row; it has been re-registered.")
        } else {
            format!("Courier order-status webhook is missing ({streak} checks in a row) and could not be registered.")
        };
        let delivery = self.deliver(&mut state, WEBHOOK_MISSING_KEY, &text, Utc::now()).await;
        if !matches!(delivery, AlertDelivery::Sent { .. }) {
            // deliver() only persists on success; keep the streak either way.
            self.store.save(&state).await;
        }
        delivery
    }

    /// Alert when a sync run failed too many tracks.
    pub async fn inspect_sync_result(&self, result: &SyncResult) -> AlertDelivery {
        if !self.is_active() {
            return AlertDelivery::Disabled;
        }
        if result.locked || !self.sync_failed_too_much(result) {
            return AlertDelivery::NotTriggered;
        }

        let key = format!("sync-failed:{}", result.mode.as_str());
        let text = format!(
            "Courier {} sync failed {} of {} tracks ({:.0}%); {} updated, {} skipped.",
            result.mode.as_str(),
            result.failed,
            result.tracks_total,
            result.failure_rate() * 100.0,
            result.updated,
            result.skipped,
        );
        self.send_alert(&key, &text).await
    }

    pub async fn notify_webhook_registration_failed(&self, error: &str) -> AlertDelivery {
        let text = format!("Courier order-status webhook registration failed: {error}");
        self.send_alert(WEBHOOK_REGISTRATION_FAILED_KEY, &text).await
    }

    fn sync_failed_too_much(&self, result: &SyncResult) -> bool {
        if result.failed == 0 {
            return false;
        }
        if result.failed >= self.config.sync_failed_abs {
            return true;
        }
        result.tracks_total >= self.config.sync_min_tracks_for_rate
            && result.failure_rate() >= self.config.sync_failed_rate
    }

    /// Cooldown check plus fan-out. Persists `state` only when at least one
    /// destination accepted the message.
    async fn deliver(&self, state: &mut AlertState, key: &str, text: &str, now: DateTime<Utc>) -> AlertDelivery {
        let now_ms = now.timestamp_millis();
        let cooldown_ms = self.config.cooldown.as_millis() as i64;

        if let Some(last) = state.last_alerts.get(key) {
            let elapsed = now_ms.saturating_sub(*last);
            if elapsed < cooldown_ms {
                let remaining = Duration::from_millis((cooldown_ms - elapsed) as u64);
                debug!(alert_key = key, ?remaining, "alert suppressed by cooldown");
                return AlertDelivery::Suppressed { remaining };
            }
        }

        let mut delivered = 0;
        let mut errors = Vec::new();
        for destination in &self.config.destinations {
            match self.transport.send(destination, text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(alert_key = key, error = %e, "alert destination failed");
                    errors.push(e.to_string());
                }
            }
        }

        if delivered == 0 {
            return AlertDelivery::Failed { errors };
        }

        state.last_alerts.insert(key.to_string(), now_ms);
        self.store.save(state).await;
        info!(alert_key = key, delivered, failed = errors.len(), "alert sent");
        AlertDelivery::Sent {
            delivered,
            failed: errors.len(),
        }
    }
}
