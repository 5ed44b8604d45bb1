//! Scripted in-memory courier for tests/dev.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use shipsync_core::{RemoteStatusEntry, TrackNumber};

use super::{AccessToken, CourierApi, CourierError, RemoteOrder, WebhookRegistration};

#[derive(Debug, Clone)]
enum Scripted {
    Order(RemoteOrder),
    Status(u16),
}

#[derive(Debug, Default)]
struct State {
    orders: HashMap<String, Scripted>,
    webhooks: Vec<WebhookRegistration>,
    reject_auth: usize,
    fail_token: Option<u16>,
    fail_list: Option<u16>,
    fail_create: Option<u16>,
}

/// In-memory `CourierApi`. Unknown tracks answer like the real API does for
/// a missing order (no entity).
#[derive(Debug, Default)]
pub struct InMemoryCourier {
    state: Mutex<State>,
    token_calls: AtomicUsize,
    order_calls: AtomicUsize,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl InMemoryCourier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_order(&self, track: &TrackNumber, statuses: Vec<RemoteStatusEntry>, total_sum: Option<f64>) {
        let order = RemoteOrder {
            track: track.to_string(),
            statuses,
            total_sum,
        };
        self.with_state(|s| {
            s.orders.insert(track.to_string(), Scripted::Order(order));
        });
    }

    /// Make every lookup of `track` answer with HTTP `status`.
    pub fn put_failure(&self, track: &TrackNumber, status: u16) {
        self.with_state(|s| {
            s.orders.insert(track.to_string(), Scripted::Status(status));
        });
    }

    pub fn put_webhook(&self, registration: WebhookRegistration) {
        self.with_state(|s| s.webhooks.push(registration));
    }

    /// Answer the next `times` authorized calls with 401.
    pub fn reject_auth_times(&self, times: usize) {
        self.with_state(|s| s.reject_auth = times);
    }

    pub fn fail_token_with(&self, status: Option<u16>) {
        self.with_state(|s| s.fail_token = status);
    }

    pub fn fail_list_with(&self, status: Option<u16>) {
        self.with_state(|s| s.fail_list = status);
    }

    pub fn fail_create_with(&self, status: Option<u16>) {
        self.with_state(|s| s.fail_create = status);
    }

    pub fn webhooks(&self) -> Vec<WebhookRegistration> {
        self.with_state(|s| s.webhooks.clone())
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut state)
    }

    fn check_auth(&self) -> Result<(), CourierError> {
        self.with_state(|s| {
            if s.reject_auth > 0 {
                s.reject_auth -= 1;
                return Err(status_error(401));
            }
            Ok(())
        })
    }
}

fn status_error(status: u16) -> CourierError {
    CourierError::Status {
        status,
        body: format!("scripted HTTP {status}"),
    }
}

#[async_trait]
impl CourierApi for InMemoryCourier {
    async fn fetch_token(&self) -> Result<AccessToken, CourierError> {
        let n = self.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(status) = self.with_state(|s| s.fail_token) {
            return Err(status_error(status));
        }
        Ok(AccessToken::new(format!("token-{n}"), 3600))
    }

    async fn order_by_track(&self, _token: &AccessToken, track: &TrackNumber) -> Result<RemoteOrder, CourierError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;
        match self.with_state(|s| s.orders.get(track.as_str()).cloned()) {
            Some(Scripted::Order(order)) => Ok(order),
            Some(Scripted::Status(status)) => Err(status_error(status)),
            None => Err(CourierError::NotFound(track.to_string())),
        }
    }

    async fn list_webhooks(&self, _token: &AccessToken) -> Result<Vec<WebhookRegistration>, CourierError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;
        if let Some(status) = self.with_state(|s| s.fail_list) {
            return Err(status_error(status));
        }
        Ok(self.webhooks())
    }

    async fn create_webhook(
        &self,
        _token: &AccessToken,
        kind: &str,
        url: &str,
    ) -> Result<WebhookRegistration, CourierError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_auth()?;
        if let Some(status) = self.with_state(|s| s.fail_create) {
            return Err(status_error(status));
        }
        let registration = WebhookRegistration {
            uuid: Some(format!("webhook-{n}")),
            kind: kind.to_string(),
            url: url.to_string(),
        };
        self.put_webhook(registration.clone());
        Ok(registration)
    }
}
