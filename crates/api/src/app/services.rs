use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use shipsync_infra::alerts::{AlertTransport, HttpAlertTransport};
use shipsync_infra::{
    AlertNotifier, AppConfig, CourierApi, FileLock, HttpCourierClient, HttpGuard, InMemoryShipmentStore,
    PostgresShipmentStore, ShipmentStore, TokenProvider, TrackSyncEngine, WebhookReconciler,
};

/// Provider segment used when `WEBHOOK_PROVIDER` is not set.
pub const DEFAULT_PROVIDER: &str = "cdek";

const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the HTTP handlers and the scheduler need.
pub struct AppServices {
    /// Path segment of `POST /webhooks/<provider>`.
    pub provider: String,
    pub sync: Arc<TrackSyncEngine>,
    pub reconciler: Arc<WebhookReconciler>,
    pub alerts: Arc<AlertNotifier>,
}

impl AppServices {
    pub fn register_route(&self) -> String {
        format!("{}-register", self.provider)
    }
}

/// Production wiring: HTTP courier client, HTTP alert transport, and a
/// Postgres store when `DATABASE_URL` is set.
pub async fn build_services(config: &AppConfig, provider: impl Into<String>) -> anyhow::Result<AppServices> {
    let store: Arc<dyn ShipmentStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresShipmentStore::connect(url)
                .await
                .context("failed to connect to Postgres")?;
            info!("using Postgres shipment store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory shipment store");
            Arc::new(InMemoryShipmentStore::new())
        }
    };

    let courier = Arc::new(HttpCourierClient::new(&config.courier).context("failed to build courier client")?);
    let transport =
        Arc::new(HttpAlertTransport::new(ALERT_TIMEOUT).context("failed to build alert transport")?);

    Ok(wire(config, provider, store, courier, transport))
}

/// Assemble the service graph from already-built adapters.
///
/// Each remote dependency gets its own guard, so a failing webhook endpoint
/// cannot open the circuit for order lookups.
pub fn wire(
    config: &AppConfig,
    provider: impl Into<String>,
    store: Arc<dyn ShipmentStore>,
    courier: Arc<dyn CourierApi>,
    transport: Arc<dyn AlertTransport>,
) -> AppServices {
    let lock = Arc::new(FileLock::new(config.lock_dir.clone()));
    let tokens = Arc::new(TokenProvider::new(
        courier.clone(),
        HttpGuard::new("courier.token", config.guard.clone()),
    ));
    let alerts = Arc::new(AlertNotifier::new(config.alerts.clone(), transport));
    if !alerts.is_active() {
        info!("alerts disabled (no destinations configured)");
    }

    let sync = Arc::new(TrackSyncEngine::new(
        config.sync.clone(),
        store,
        courier.clone(),
        tokens.clone(),
        Arc::new(HttpGuard::new("courier.orders", config.guard.clone())),
        lock.clone(),
    ));

    let reconciler = Arc::new(WebhookReconciler::new(
        config.webhook.clone(),
        courier,
        tokens,
        Arc::new(HttpGuard::new("courier.webhooks", config.guard.clone())),
        lock,
        alerts.clone(),
        sync.clone(),
    ));

    AppServices {
        provider: provider.into(),
        sync,
        reconciler,
        alerts,
    }
}
