//! reqwest-backed courier client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use shipsync_core::{RemoteStatusEntry, TrackNumber};

use super::{AccessToken, CourierApi, CourierError, RemoteOrder, WebhookRegistration};
use crate::config::CourierConfig;

const TOKEN_PATH: &str = "/v2/oauth/token";
const ORDERS_PATH: &str = "/v2/orders";
const WEBHOOKS_PATH: &str = "/v2/webhooks";

/// Upstream error bodies are truncated to this many bytes in errors/logs.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    entity: Option<OrderEntity>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    #[serde(default)]
    cdek_number: Option<String>,
    #[serde(default)]
    statuses: Vec<WireStatus>,
    #[serde(default)]
    delivery_detail: Option<DeliveryDetail>,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    code: String,
    date_time: String,
}

#[derive(Debug, Deserialize)]
struct DeliveryDetail {
    #[serde(default)]
    total_sum: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CreateWebhook<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateWebhookResponse {
    entity: Option<CreatedEntity>,
}

#[derive(Debug, Deserialize)]
struct CreatedEntity {
    uuid: Option<String>,
}

/// HTTP client for the courier's v2 API.
#[derive(Debug, Clone)]
pub struct HttpCourierClient {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpCourierClient {
    pub fn new(config: &CourierConfig) -> Result<Self, CourierError> {
        Self::with_timeout(
            &config.base_url,
            &config.client_id,
            &config.client_secret,
            config.request_timeout,
        )
    }

    pub fn with_timeout(
        base_url: &str,
        client_id: &str,
        client_secret: &str,
        timeout: Duration,
    ) -> Result<Self, CourierError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CourierError::Connect(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CourierError> {
        let response = request.send().await.map_err(map_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        debug!(status = status.as_u16(), body = %body, "courier returned error status");
        Err(CourierError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CourierError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await.map_err(map_transport)?;
        serde_json::from_slice(&bytes).map_err(|e| CourierError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CourierApi for HttpCourierClient {
    async fn fetch_token(&self) -> Result<AccessToken, CourierError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let token: TokenResponse = self
            .send_json(self.http.post(self.url(TOKEN_PATH)).form(&form))
            .await?;
        Ok(AccessToken::new(token.access_token, token.expires_in))
    }

    async fn order_by_track(&self, token: &AccessToken, track: &TrackNumber) -> Result<RemoteOrder, CourierError> {
        let request = self
            .http
            .get(self.url(ORDERS_PATH))
            .query(&[("cdek_number", track.as_str())])
            .header(reqwest::header::AUTHORIZATION, token.bearer());
        let envelope: OrderEnvelope = self.send_json(request).await?;

        let Some(entity) = envelope.entity else {
            return Err(CourierError::NotFound(track.to_string()));
        };

        let mut statuses = Vec::with_capacity(entity.statuses.len());
        for status in entity.statuses {
            match parse_timestamp(&status.date_time) {
                Some(at) => statuses.push(RemoteStatusEntry { code: status.code, at }),
                None => warn!(
                    track = %track,
                    code = %status.code,
                    raw = %status.date_time,
                    "dropping status with unparseable timestamp"
                ),
            }
        }

        Ok(RemoteOrder {
            track: entity.cdek_number.unwrap_or_else(|| track.to_string()),
            statuses,
            total_sum: entity.delivery_detail.and_then(|d| d.total_sum),
        })
    }

    async fn list_webhooks(&self, token: &AccessToken) -> Result<Vec<WebhookRegistration>, CourierError> {
        let request = self
            .http
            .get(self.url(WEBHOOKS_PATH))
            .header(reqwest::header::AUTHORIZATION, token.bearer());
        self.send_json(request).await
    }

    async fn create_webhook(
        &self,
        token: &AccessToken,
        kind: &str,
        url: &str,
    ) -> Result<WebhookRegistration, CourierError> {
        let request = self
            .http
            .post(self.url(WEBHOOKS_PATH))
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .json(&CreateWebhook { kind, url });
        let created: CreateWebhookResponse = self.send_json(request).await?;

        Ok(WebhookRegistration {
            uuid: created.entity.and_then(|e| e.uuid),
            kind: kind.to_string(),
            url: url.to_string(),
        })
    }
}

fn map_transport(err: reqwest::Error) -> CourierError {
    if err.is_timeout() {
        CourierError::Timeout
    } else if err.is_connect() {
        CourierError::Connect(err.to_string())
    } else if err.is_decode() {
        CourierError::Decode(err.to_string())
    } else {
        CourierError::NoResponse(err.to_string())
    }
}

/// The courier sends `2024-03-09T15:00:00+0000`; RFC 3339 is accepted too.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
