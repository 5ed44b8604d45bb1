//! Courier order-status API: wire types, error classification and clients.

pub mod http;
pub mod in_memory;
pub mod token;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use shipsync_core::{RemoteSnapshot, RemoteStatusEntry, TrackNumber};

use crate::http_guard::{Classify, Disposition};

pub use http::HttpCourierClient;
pub use in_memory::InMemoryCourier;
pub use token::TokenProvider;

/// Subscription type for order status pushes.
pub const ORDER_STATUS_WEBHOOK: &str = "ORDER_STATUS";

/// Cached tokens are treated as expired this long before the courier says so.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 30;

/// OAuth bearer token for the courier API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in_secs: i64) -> Self {
        Self {
            value: value.into(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS) < self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Courier-side order: status history plus the order total.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteOrder {
    pub track: String,
    pub statuses: Vec<RemoteStatusEntry>,
    /// Major currency units as reported by the courier.
    pub total_sum: Option<f64>,
}

impl RemoteOrder {
    pub fn snapshot(&self) -> RemoteSnapshot {
        RemoteSnapshot::from_history(&self.statuses, self.total_sum)
    }
}

/// One push subscription registered with the courier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("courier request timed out")]
    Timeout,

    #[error("no response from courier: {0}")]
    NoResponse(String),

    #[error("cannot connect to courier: {0}")]
    Connect(String),

    #[error("courier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("courier has no order for track {0}")]
    NotFound(String),

    #[error("unreadable courier response: {0}")]
    Decode(String),
}

impl CourierError {
    pub fn status(&self) -> Option<u16> {
        match self {
            CourierError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The courier does not know the track; the item is skipped, not failed.
    pub fn is_unknown_track(&self) -> bool {
        matches!(self, CourierError::NotFound(_)) || self.status() == Some(400)
    }
}

impl Classify for CourierError {
    fn disposition(&self) -> Disposition {
        match self {
            CourierError::Timeout | CourierError::NoResponse(_) => Disposition::Retryable,
            CourierError::Connect(_) => Disposition::Connectivity,
            CourierError::Status { status, .. } => match *status {
                401 | 403 => Disposition::Auth,
                408 | 429 => Disposition::Retryable,
                s if s >= 500 => Disposition::Retryable,
                _ => Disposition::Rejected,
            },
            CourierError::NotFound(_) | CourierError::Decode(_) => Disposition::Rejected,
        }
    }
}

/// Outbound courier operations. One call per method invocation; retries and
/// circuit breaking are layered on top by the callers.
#[async_trait]
pub trait CourierApi: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, CourierError>;

    async fn order_by_track(&self, token: &AccessToken, track: &TrackNumber) -> Result<RemoteOrder, CourierError>;

    async fn list_webhooks(&self, token: &AccessToken) -> Result<Vec<WebhookRegistration>, CourierError>;

    async fn create_webhook(
        &self,
        token: &AccessToken,
        kind: &str,
        url: &str,
    ) -> Result<WebhookRegistration, CourierError>;
}
