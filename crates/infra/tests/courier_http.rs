//! HTTP courier client against a mock courier API.
//!
//! Tests cover:
//! - OAuth client-credentials token exchange
//! - Order lookup decoding and status history folding
//! - Webhook listing and registration
//! - Transport failure mapping (timeout, connect, HTTP status)
//! - Guard + token refresh over real HTTP

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shipsync_core::{DeliveryStatus, TrackNumber};
use shipsync_infra::courier::{AccessToken, CourierApi, CourierError, HttpCourierClient, TokenProvider};
use shipsync_infra::http_guard::{GuardConfig, HttpGuard, RetryPolicy};

fn client(server: &MockServer) -> HttpCourierClient {
    HttpCourierClient::with_timeout(&server.uri(), "client-id", "client-secret", Duration::from_secs(2)).unwrap()
}

fn token() -> AccessToken {
    AccessToken::new("tok-1", 3600)
}

fn track() -> TrackNumber {
    TrackNumber::parse("1234567890").unwrap()
}

fn order_json() -> serde_json::Value {
    json!({
        "entity": {
            "uuid": "72753031-0c9e-4d1c-9c4a-6f1a1e8a8f77",
            "cdek_number": "1234567890",
            "delivery_detail": { "total_sum": 349.99 },
            "statuses": [
                { "code": "DELIVERED", "name": "Delivered", "date_time": "2024-03-09T15:00:00+0300" },
                { "code": "RECEIVED_AT_SHIPMENT_WAREHOUSE", "name": "Received", "date_time": "2024-03-02T10:00:00+0300" },
                { "code": "CREATED", "name": "Created", "date_time": "2024-03-01T09:00:00+0300" }
            ]
        },
        "requests": []
    })
}

#[tokio::test]
async fn fetch_token_uses_client_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=client-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = client(&server).fetch_token().await.unwrap();

    assert_eq!(token.value, "abc");
    assert!(token.is_fresh());
}

#[tokio::test]
async fn order_lookup_folds_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .and(query_param("cdek_number", "1234567890"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(order_json()))
        .expect(1)
        .mount(&server)
        .await;

    let order = client(&server).order_by_track(&token(), &track()).await.unwrap();
    let snapshot = order.snapshot();

    assert_eq!(order.statuses.len(), 3);
    assert_eq!(snapshot.status, Some(DeliveryStatus::Delivered));
    assert_eq!(snapshot.remote_status_code.as_deref(), Some("DELIVERED"));
    assert_eq!(snapshot.send_date, chrono::NaiveDate::from_ymd_opt(2024, 3, 2));
    assert_eq!(snapshot.delivered_date, chrono::NaiveDate::from_ymd_opt(2024, 3, 9));
    assert_eq!(snapshot.price, Some(34999));
}

#[tokio::test]
async fn order_without_entity_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "requests": [{ "state": "INVALID", "errors": [{ "code": "v2_entity_not_found" }] }]
        })))
        .mount(&server)
        .await;

    let err = client(&server).order_by_track(&token(), &track()).await.unwrap_err();
    assert!(matches!(err, CourierError::NotFound(_)));
    assert!(err.is_unknown_track());
}

#[tokio::test]
async fn error_status_is_surfaced_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid cdek_number"))
        .mount(&server)
        .await;

    let err = client(&server).order_by_track(&token(), &track()).await.unwrap_err();
    match err {
        CourierError::Status { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "invalid cdek_number");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/webhooks"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client(&server).list_webhooks(&token()).await.unwrap_err();
    assert!(matches!(err, CourierError::Decode(_)));
}

#[tokio::test]
async fn slow_courier_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client =
        HttpCourierClient::with_timeout(&server.uri(), "id", "secret", Duration::from_millis(100)).unwrap();
    let err = client.order_by_track(&token(), &track()).await.unwrap_err();
    assert!(matches!(err, CourierError::Timeout));
}

#[tokio::test]
async fn refused_connection_is_connect_error() {
    let client = HttpCourierClient::with_timeout("http://127.0.0.1:1", "id", "secret", Duration::from_secs(2)).unwrap();
    let err = client.fetch_token().await.unwrap_err();
    assert!(matches!(err, CourierError::Connect(_)));
}

#[tokio::test]
async fn webhooks_are_listed_and_created() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/webhooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "uuid": "w-1", "type": "ORDER_STATUS", "url": "https://crm.test/webhooks/courier" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/webhooks"))
        .and(body_string_contains("\"type\":\"ORDER_STATUS\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entity": { "uuid": "w-2" },
            "requests": [{ "state": "ACCEPTED" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let listed = client.list_webhooks(&token()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].kind, "ORDER_STATUS");

    let created = client
        .create_webhook(&token(), "ORDER_STATUS", "https://crm.test/webhooks/courier")
        .await
        .unwrap();
    assert_eq!(created.uuid.as_deref(), Some("w-2"));
}

#[tokio::test]
async fn expired_token_is_refreshed_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "first",
            "expires_in": 3600
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "second",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .and(header("Authorization", "Bearer first"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .and(header("Authorization", "Bearer second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(order_json()))
        .expect(1)
        .mount(&server)
        .await;

    let api = Arc::new(client(&server));
    let guard_config = GuardConfig {
        retry: RetryPolicy::no_retry(),
        ..GuardConfig::default()
    };
    let tokens = TokenProvider::new(api.clone(), HttpGuard::new("courier.token", guard_config.clone()));
    let orders = HttpGuard::new("courier.orders", guard_config);

    let order = tokens
        .call_authorized(&orders, "order_by_track", |token| {
            let api = api.clone();
            async move { api.order_by_track(&token, &track()).await }
        })
        .await
        .unwrap();

    assert_eq!(order.track, "1234567890");
    assert_eq!(orders.snapshot().consecutive_failures, 0);
}

#[tokio::test]
async fn server_errors_are_retried_by_the_guard() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(order_json()))
        .mount(&server)
        .await;

    let api = client(&server);
    let guard = HttpGuard::new(
        "courier.orders",
        GuardConfig {
            retry: RetryPolicy::exponential(4, Duration::from_millis(10), Duration::from_millis(50)),
            ..GuardConfig::default()
        },
    );

    let (token, track) = (token(), track());
    let order = guard
        .execute("order_by_track", || api.order_by_track(&token, &track))
        .await
        .unwrap();
    assert_eq!(order.statuses.len(), 3);
}
