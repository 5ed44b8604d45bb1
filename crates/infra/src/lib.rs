//! Infrastructure layer: courier client, resilience, locking, stores, sync
//! engine, webhook reconciliation and alerting.

pub mod alerts;
pub mod config;
pub mod courier;
pub mod http_guard;
pub mod job_lock;
pub mod rate_limit;
pub mod store;
pub mod track_sync;
pub mod webhook;


pub use alerts::{AlertConfig, AlertDelivery, AlertNotifier};
pub use config::{AppConfig, ConfigError, CourierConfig, ScheduleConfig};
pub use courier::{CourierApi, CourierError, HttpCourierClient, InMemoryCourier, TokenProvider};
pub use http_guard::{GuardConfig, GuardError, HttpGuard};
pub use job_lock::{DistributedLock, FileLock, LockHandle, LockOptions};
pub use rate_limit::RateLimiter;
pub use store::{InMemoryShipmentStore, PostgresShipmentStore, ShipmentStore};
pub use track_sync::{SyncError, SyncOptions, TrackSyncConfig, TrackSyncEngine};
pub use webhook::{ReconcileError, ReconcileOptions, ReconcileReport, WebhookConfig, WebhookReconciler};
