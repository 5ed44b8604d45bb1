//! Access-token cache with single-flight refresh.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{AccessToken, CourierApi, CourierError};
use crate::http_guard::{Classify, Disposition, GuardError, HttpGuard};

/// Hands out courier access tokens.
///
/// All fetches happen while holding the cache mutex, so concurrent workers
/// that hit an expired or rejected token trigger one refresh between them.
/// A failed fetch is not cached; the next waiter tries again.
pub struct TokenProvider {
    api: Arc<dyn CourierApi>,
    guard: HttpGuard,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(api: Arc<dyn CourierApi>, guard: HttpGuard) -> Self {
        Self {
            api,
            guard,
            cached: Mutex::new(None),
        }
    }

    /// Cached token while it is fresh, otherwise a newly fetched one.
    pub async fn current(&self) -> Result<AccessToken, GuardError<CourierError>> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.clone());
        }
        let token = self.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Replace a token the courier rejected.
    ///
    /// If another caller already swapped `stale` for a fresh token while we
    /// waited on the lock, that token is returned without a remote call.
    pub async fn refresh(&self, stale: &AccessToken) -> Result<AccessToken, GuardError<CourierError>> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached
            .as_ref()
            .filter(|t| t.value != stale.value && t.is_fresh())
        {
            debug!("token already refreshed by another caller");
            return Ok(token.clone());
        }
        let token = self.fetch().await?;
        *cached = Some(token.clone());
        info!("courier token refreshed after rejection");
        Ok(token)
    }

    /// Run `call` with a valid token; on 401/403 refresh once and retry once.
    pub async fn call_authorized<T, F, Fut>(
        &self,
        guard: &HttpGuard,
        operation: &str,
        call: F,
    ) -> Result<T, GuardError<CourierError>>
    where
        F: Fn(AccessToken) -> Fut,
        Fut: Future<Output = Result<T, CourierError>>,
    {
        let token = self.current().await?;
        match guard.execute(operation, || call(token.clone())).await {
            Err(GuardError::Remote(e)) if e.disposition() == Disposition::Auth => {
                debug!(operation, error = %e, "courier rejected token, refreshing");
                let fresh = self.refresh(&token).await?;
                guard.execute(operation, || call(fresh.clone())).await
            }
            other => other,
        }
    }

    async fn fetch(&self) -> Result<AccessToken, GuardError<CourierError>> {
        let api = self.api.clone();
        self.guard
            .execute("fetch_token", || {
                let api = api.clone();
                async move { api.fetch_token().await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::InMemoryCourier;
    use crate::http_guard::GuardConfig;
    use shipsync_core::TrackNumber;

    fn provider(courier: Arc<InMemoryCourier>) -> TokenProvider {
        TokenProvider::new(courier, HttpGuard::new("courier.token", GuardConfig::default()))
    }

    #[tokio::test]
    async fn caches_fresh_token() {
        let courier = Arc::new(InMemoryCourier::new());
        let tokens = provider(courier.clone());

        let a = tokens.current().await.unwrap();
        let b = tokens.current().await.unwrap();

        assert_eq!(a, b);
        assert_eq!(courier.token_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_fetch_once() {
        let courier = Arc::new(InMemoryCourier::new());
        let tokens = Arc::new(provider(courier.clone()));
        let stale = tokens.current().await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let tokens = tokens.clone();
            let stale = stale.clone();
            tasks.push(tokio::spawn(async move { tokens.refresh(&stale).await.unwrap() }));
        }
        let mut refreshed = Vec::new();
        for t in tasks {
            refreshed.push(t.await.unwrap());
        }

        assert_eq!(courier.token_calls(), 2);
        assert!(refreshed.iter().all(|t| t == &refreshed[0]));
        assert_ne!(refreshed[0].value, stale.value);
    }

    #[tokio::test]
    async fn auth_rejection_refreshes_and_retries_once() {
        let courier = Arc::new(InMemoryCourier::new());
        let track = TrackNumber::parse("1000000001").unwrap();
        courier.put_order(&track, Vec::new(), None);
        courier.reject_auth_times(1);

        let tokens = provider(courier.clone());
        let orders_guard = HttpGuard::new("courier.orders", GuardConfig::default());

        let api = courier.clone();
        let order = tokens
            .call_authorized(&orders_guard, "order_by_track", |token| {
                let api = api.clone();
                let track = track.clone();
                async move { api.order_by_track(&token, &track).await }
            })
            .await
            .unwrap();

        assert_eq!(order.track, "1000000001");
        assert_eq!(courier.token_calls(), 2);
        assert_eq!(courier.order_calls(), 2);
        assert_eq!(orders_guard.snapshot().consecutive_failures, 0);
    }
}
