//! Outbound alert delivery.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::AlertError;

#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Deliver `text` to one destination.
    async fn send(&self, destination: &str, text: &str) -> Result<(), AlertError>;
}

#[derive(Debug, Serialize)]
struct AlertMessage<'a> {
    text: &'a str,
}

/// Posts `{"text": ...}` to chat-style incoming webhooks.
#[derive(Debug, Clone)]
pub struct HttpAlertTransport {
    http: reqwest::Client,
}

impl HttpAlertTransport {
    pub fn new(timeout: Duration) -> Result<Self, AlertError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AlertTransport for HttpAlertTransport {
    async fn send(&self, destination: &str, text: &str) -> Result<(), AlertError> {
        let response = self
            .http
            .post(destination)
            .json(&AlertMessage { text })
            .send()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Transport(format!("destination answered HTTP {status}")));
        }
        Ok(())
    }
}

/// Transport that records messages instead of sending them (tests/dev).
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `destination` fail.
    pub fn fail_destination(&self, destination: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(destination.into());
        }
    }

    /// `(destination, text)` pairs delivered so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertTransport for RecordingTransport {
    async fn send(&self, destination: &str, text: &str) -> Result<(), AlertError> {
        let fails = self
            .failing
            .lock()
            .map(|f| f.contains(destination))
            .unwrap_or(false);
        if fails {
            return Err(AlertError::Transport(format!("{destination} unreachable")));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((destination.to_string(), text.to_string()));
        }
        Ok(())
    }
}
