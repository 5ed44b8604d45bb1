//! Keeps the courier's order-status push subscription registered.
//!
//! A reconcile run lists the courier's subscriptions, registers ours if it is
//! missing, reports the outcome to the alert notifier and, unless told not
//! to, follows up with a track sync to catch pushes missed while the
//! subscription was absent.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use shipsync_core::SyncResult;

use crate::alerts::AlertNotifier;
use crate::courier::{CourierApi, CourierError, ORDER_STATUS_WEBHOOK, TokenProvider, WebhookRegistration};
use crate::http_guard::{GuardError, HttpGuard};
use crate::job_lock::{DistributedLock, LockError, LockOptions};
use crate::track_sync::{SyncError, SyncOptions, TrackSyncEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Public URL the courier should push to. Required for reconcile.
    pub callback_url: Option<String>,
    pub webhook_type: String,
    pub lock_key: String,
    pub lock: LockOptions,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            callback_url: None,
            webhook_type: ORDER_STATUS_WEBHOOK.to_string(),
            lock_key: "webhook-reconcile".to_string(),
            lock: LockOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOptions {
    pub skip_sync: bool,
    /// Options for the follow-up sync.
    pub sync: SyncOptions,
}

impl ReconcileOptions {
    pub fn skip_sync(mut self) -> Self {
        self.skip_sync = true;
        self
    }

    pub fn with_sync(mut self, sync: SyncOptions) -> Self {
        self.sync = sync;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Our subscription exists after this run.
    pub has_webhook: bool,
    /// This run registered it.
    pub created: bool,
    pub total_webhooks: usize,
    pub sync: Option<SyncResult>,
    /// Another reconcile held the lock; nothing was done.
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("webhook callback URL is not configured")]
    MissingCallbackUrl,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("listing courier webhooks failed: {0}")]
    Courier(#[from] GuardError<CourierError>),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub struct WebhookReconciler {
    config: WebhookConfig,
    courier: Arc<dyn CourierApi>,
    tokens: Arc<TokenProvider>,
    guard: Arc<HttpGuard>,
    lock: Arc<dyn DistributedLock>,
    alerts: Arc<AlertNotifier>,
    sync: Arc<TrackSyncEngine>,
}

impl WebhookReconciler {
    pub fn new(
        config: WebhookConfig,
        courier: Arc<dyn CourierApi>,
        tokens: Arc<TokenProvider>,
        guard: Arc<HttpGuard>,
        lock: Arc<dyn DistributedLock>,
        alerts: Arc<AlertNotifier>,
        sync: Arc<TrackSyncEngine>,
    ) -> Self {
        Self {
            config,
            courier,
            tokens,
            guard,
            lock,
            alerts,
            sync,
        }
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    #[instrument(skip(self), fields(skip_sync = options.skip_sync))]
    pub async fn reconcile(&self, options: ReconcileOptions) -> Result<ReconcileReport, ReconcileError> {
        let callback_url = self
            .config
            .callback_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ReconcileError::MissingCallbackUrl)?
            .to_string();

        let Some(handle) = self.lock.acquire(&self.config.lock_key, &self.config.lock).await? else {
            info!(lock_key = %self.config.lock_key, "webhook reconcile already running elsewhere");
            return Ok(ReconcileReport {
                locked: true,
                ..Default::default()
            });
        };

        let registered = self.ensure_registered(&callback_url).await;

        // The follow-up sync takes its own lock; do not hold this one across it.
        match self.lock.release(handle).await {
            Ok(true) => {}
            Ok(false) => warn!(lock_key = %self.config.lock_key, "reconcile lock was lost before release"),
            Err(e) => warn!(lock_key = %self.config.lock_key, error = %e, "failed to release reconcile lock"),
        }

        let mut report = registered?;
        let missing = !report.has_webhook || report.created;
        self.alerts.record_webhook_check(missing, report.created).await;
        if let Some(err) = &report.registration_error {
            self.alerts.notify_webhook_registration_failed(err).await;
        }

        if !options.skip_sync {
            let result = self.sync.sync_tracks(options.sync).await?;
            self.alerts.inspect_sync_result(&result).await;
            report.sync = Some(result);
        }

        Ok(report)
    }

    async fn ensure_registered(&self, callback_url: &str) -> Result<ReconcileReport, ReconcileError> {
        let courier = self.courier.clone();
        let existing: Vec<WebhookRegistration> = self
            .tokens
            .call_authorized(&self.guard, "list_webhooks", |token| {
                let courier = courier.clone();
                async move { courier.list_webhooks(&token).await }
            })
            .await?;

        let mut report = ReconcileReport {
            total_webhooks: existing.len(),
            ..Default::default()
        };

        if existing
            .iter()
            .any(|w| matches_subscription(w, &self.config.webhook_type, callback_url))
        {
            report.has_webhook = true;
            return Ok(report);
        }

        warn!(url = %callback_url, "order-status webhook missing, registering");
        let kind = self.config.webhook_type.clone();
        let url = callback_url.to_string();
        let created = self
            .tokens
            .call_authorized(&self.guard, "create_webhook", |token| {
                let courier = courier.clone();
                let kind = kind.clone();
                let url = url.clone();
                async move { courier.create_webhook(&token, &kind, &url).await }
            })
            .await;

        match created {
            Ok(registration) => {
                info!(uuid = ?registration.uuid, "order-status webhook registered");
                report.has_webhook = true;
                report.created = true;
                report.total_webhooks += 1;
            }
            Err(e) => {
                error!(error = %e, "order-status webhook registration failed");
                report.registration_error = Some(e.to_string());
            }
        }
        Ok(report)
    }
}

fn normalise_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

fn matches_subscription(registration: &WebhookRegistration, kind: &str, callback_url: &str) -> bool {
    registration.kind.eq_ignore_ascii_case(kind) && normalise_url(&registration.url) == normalise_url(callback_url)
}
