//! Environment-driven configuration.
//!
//! Every knob has a default except the courier credentials. Values are read
//! through a lookup function so tests can feed a map instead of the process
//! environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::alerts::AlertConfig;
use crate::http_guard::{CircuitPolicy, GuardConfig, RetryPolicy};
use crate::job_lock::LockOptions;
use crate::track_sync::TrackSyncConfig;
use crate::webhook::WebhookConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Courier API endpoint and credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct CourierConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for CourierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Interval driver settings. A zero interval disables that loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub delta_interval: Duration,
    pub full_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            delta_interval: Duration::from_secs(15 * 60),
            full_interval: Duration::from_secs(24 * 60 * 60),
            reconcile_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub courier: CourierConfig,
    pub guard: GuardConfig,
    pub lock_dir: PathBuf,
    pub sync: TrackSyncConfig,
    pub webhook: WebhookConfig,
    pub alerts: AlertConfig,
    pub schedule: ScheduleConfig,
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let courier = CourierConfig {
            base_url: env
                .string("COURIER_BASE_URL")
                .unwrap_or_else(|| "https://api.cdek.ru".to_string()),
            client_id: env.required("COURIER_CLIENT_ID")?,
            client_secret: env.required("COURIER_CLIENT_SECRET")?,
            request_timeout: env.millis("COURIER_TIMEOUT_MS", Duration::from_secs(10))?,
        };

        let retry_defaults = RetryPolicy::default();
        let circuit_defaults = CircuitPolicy::default();
        let guard = GuardConfig {
            retry: RetryPolicy {
                max_attempts: env.parse("HTTP_RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts)?.max(1),
                base_delay: env.millis("HTTP_RETRY_BASE_MS", retry_defaults.base_delay)?,
                max_delay: env.millis("HTTP_RETRY_MAX_BACKOFF_MS", retry_defaults.max_delay)?,
                jitter: env.millis("HTTP_RETRY_JITTER_MS", retry_defaults.jitter)?,
            },
            circuit: CircuitPolicy {
                threshold: env.parse("HTTP_CIRCUIT_THRESHOLD", circuit_defaults.threshold)?.max(1),
                cooldown: env.millis("HTTP_CIRCUIT_COOLDOWN_MS", circuit_defaults.cooldown)?,
            },
        };

        let lock_dir = env
            .string("JOB_LOCK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("shipsync-locks"));

        let sync_defaults = TrackSyncConfig::default();
        let sync = TrackSyncConfig {
            delivery_method: env
                .string("SYNC_DELIVERY_METHOD")
                .unwrap_or(sync_defaults.delivery_method),
            concurrency: env.parse("SYNC_CONCURRENCY", sync_defaults.concurrency)?,
            fast_concurrency: env.parse("SYNC_FAST_CONCURRENCY", sync_defaults.fast_concurrency)?,
            min_interval: env.millis("SYNC_MIN_INTERVAL_MS", sync_defaults.min_interval)?,
            fast_min_interval: env.millis("SYNC_FAST_MIN_INTERVAL_MS", sync_defaults.fast_min_interval)?,
            lock_key: sync_defaults.lock_key,
            lock: lock_options(&env, "SYNC_LOCK_TTL_MS", "SYNC_LOCK_WAIT_MS", sync_defaults.lock)?,
        };

        let webhook_defaults = WebhookConfig::default();
        let webhook = WebhookConfig {
            callback_url: env.string("COURIER_WEBHOOK_URL"),
            webhook_type: webhook_defaults.webhook_type,
            lock_key: webhook_defaults.lock_key,
            lock: lock_options(&env, "WEBHOOK_LOCK_TTL_MS", "WEBHOOK_LOCK_WAIT_MS", webhook_defaults.lock)?,
        };

        let alert_defaults = AlertConfig::default();
        let alerts = AlertConfig {
            enabled: env.parse("ALERTS_ENABLED", alert_defaults.enabled)?,
            destinations: env
                .string("ALERT_WEBHOOK_URLS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            cooldown: env.minutes("ALERT_COOLDOWN_MINUTES", alert_defaults.cooldown)?,
            webhook_missing_threshold: env.parse(
                "ALERT_WEBHOOK_MISSING_THRESHOLD",
                alert_defaults.webhook_missing_threshold,
            )?,
            sync_failed_abs: env.parse("ALERT_SYNC_FAILED_ABS", alert_defaults.sync_failed_abs)?,
            sync_failed_rate: env.parse("ALERT_SYNC_FAILED_RATE", alert_defaults.sync_failed_rate)?,
            sync_min_tracks_for_rate: env.parse(
                "ALERT_SYNC_MIN_TRACKS_FOR_RATE",
                alert_defaults.sync_min_tracks_for_rate,
            )?,
            state_path: env
                .string("ALERT_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(alert_defaults.state_path),
        };

        let schedule_defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            delta_interval: env.secs("SCHEDULE_DELTA_SECS", schedule_defaults.delta_interval)?,
            full_interval: env.secs("SCHEDULE_FULL_SECS", schedule_defaults.full_interval)?,
            reconcile_interval: env.secs("SCHEDULE_RECONCILE_SECS", schedule_defaults.reconcile_interval)?,
        };

        Ok(Self {
            courier,
            guard,
            lock_dir,
            sync,
            webhook,
            alerts,
            schedule,
            database_url: env.string("DATABASE_URL"),
        })
    }
}

fn lock_options<F>(
    env: &Env<F>,
    ttl_key: &'static str,
    wait_key: &'static str,
    defaults: LockOptions,
) -> Result<LockOptions, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(defaults
        .with_ttl(env.millis(ttl_key, defaults.ttl)?)
        .with_wait(env.millis(wait_key, defaults.wait)?))
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.string(key).ok_or(ConfigError::Missing(key))
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_millis() as u64).map(Duration::from_millis)
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn minutes(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let minutes: u64 = self.parse(key, default.as_secs() / 60)?;
        minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Invalid {
                key,
                value: minutes.to_string(),
                reason: "too large".to_string(),
            })
    }
}
