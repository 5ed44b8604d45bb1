use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shipsync_core::{DeliveryStatus, ShipmentRecord, TrackNumber};
use shipsync_infra::alerts::RecordingTransport;
use shipsync_infra::{AppConfig, HttpCourierClient, InMemoryShipmentStore};

const CALLBACK: &str = "https://crm.test/webhooks/cdek";

struct TestServer {
    base_url: String,
    store: Arc<InMemoryShipmentStore>,
    handle: tokio::task::JoinHandle<()>,
    _courier: MockServer,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let courier = fake_courier().await;
        let dir = tempfile::tempdir().expect("tempdir");

        let vars = [
            ("COURIER_BASE_URL", courier.uri()),
            ("COURIER_CLIENT_ID", "id".to_string()),
            ("COURIER_CLIENT_SECRET", "secret".to_string()),
            ("COURIER_WEBHOOK_URL", CALLBACK.to_string()),
            ("HTTP_RETRY_MAX_ATTEMPTS", "1".to_string()),
            ("SYNC_MIN_INTERVAL_MS", "0".to_string()),
            ("JOB_LOCK_DIR", dir.path().join("locks").to_string_lossy().into_owned()),
            ("ALERT_STATE_PATH", dir.path().join("alerts.json").to_string_lossy().into_owned()),
        ];
        let config = AppConfig::from_lookup(|key| {
            vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
        })
        .expect("config");

        let store = Arc::new(InMemoryShipmentStore::with_records([
            ShipmentRecord::new(TrackNumber::parse("1000000001").unwrap(), "courier"),
            ShipmentRecord::new(TrackNumber::parse("1000000500").unwrap(), "courier"),
        ]));
        let client = Arc::new(HttpCourierClient::new(&config.courier).expect("client"));

        // Build app (same router as prod), but bind to an ephemeral port.
        let services = shipsync_api::app::services::wire(
            &config,
            "cdek",
            store.clone(),
            client,
            Arc::new(RecordingTransport::new()),
        );
        let app = shipsync_api::app::build_app(Arc::new(services));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            handle,
            _courier: courier,
            _dir: dir,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn fake_courier() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .and(query_param("cdek_number", "1000000001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entity": {
                "cdek_number": "1000000001",
                "delivery_detail": { "total_sum": 120.0 },
                "statuses": [
                    { "code": "CREATED", "date_time": "2024-03-01T09:00:00+0000" },
                    { "code": "ACCEPTED_AT_PICK_UP_POINT", "date_time": "2024-03-05T09:00:00+0000" }
                ]
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/orders"))
        .and(query_param("cdek_number", "1000000500"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // First listing has no subscription, later ones see the registered one.
    Mock::given(method("GET"))
        .and(path("/v2/webhooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/webhooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "uuid": "w-1", "type": "ORDER_STATUS", "url": format!("{CALLBACK}/") }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/webhooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "entity": { "uuid": "w-1" } })))
        .mount(&server)
        .await;

    server
}

fn status_push(track: &str) -> serde_json::Value {
    json!({
        "type": "ORDER_STATUS",
        "date_time": "2024-03-05T09:00:00+0000",
        "uuid": "e1f7a9b0-0000-0000-0000-000000000000",
        "attributes": { "trackingNumber": track, "code": "ACCEPTED_AT_PICK_UP_POINT" }
    })
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_push_updates_shipment() {
    let srv = TestServer::spawn().await;

    let res = srv.post("/webhooks/cdek", status_push("1000000001")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "updated");
    assert!(body["changed"].as_array().unwrap().iter().any(|f| f == "status"));

    let stored = srv.store.get(&TrackNumber::parse("1000000001").unwrap()).unwrap();
    assert_eq!(stored.status, DeliveryStatus::ReadyForPickup);
    assert_eq!(stored.price, Some(12000));

    // Replaying the same push is a no-op.
    let again: serde_json::Value = srv
        .post("/webhooks/cdek", status_push("1000000001"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(again["status"], "unchanged");
    assert_eq!(srv.store.write_count(), 1);
}

#[tokio::test]
async fn other_event_types_are_ignored() {
    let srv = TestServer::spawn().await;
    let res = srv
        .post("/webhooks/cdek", json!({ "type": "PRINT_FORM", "attributes": {} }))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ignored");
    assert_eq!(srv.store.write_count(), 0);
}

#[tokio::test]
async fn malformed_push_is_rejected() {
    let srv = TestServer::spawn().await;

    let res = reqwest::Client::new()
        .post(format!("{}/webhooks/cdek", srv.base_url))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_payload");

    let res = srv.post("/webhooks/cdek", json!({ "type": "ORDER_STATUS" })).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn push_for_unknown_local_track_is_skipped() {
    let srv = TestServer::spawn().await;
    let res = srv.post("/webhooks/cdek", status_push("9999999999")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "skipped");
}

#[tokio::test]
async fn upstream_failure_is_bad_gateway() {
    let srv = TestServer::spawn().await;
    let res = srv.post("/webhooks/cdek", status_push("1000000500")).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "upstream_error");
}

#[tokio::test]
async fn register_endpoint_reconciles_idempotently() {
    let srv = TestServer::spawn().await;

    let first: serde_json::Value = srv
        .post("/webhooks/cdek-register?skipSync=true", json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["created"], true);
    assert_eq!(first["hasWebhook"], true);
    assert!(first["sync"].is_null());

    let second: serde_json::Value = srv
        .post("/webhooks/cdek-register?mode=delta", json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["created"], false);
    assert_eq!(second["hasWebhook"], true);
    assert_eq!(second["sync"]["mode"], "delta");
    assert_eq!(second["sync"]["tracksTotal"], 2);
    assert_eq!(second["sync"]["updated"], 1);
    assert_eq!(second["sync"]["failed"], 1);
}

#[tokio::test]
async fn bad_register_query_is_rejected() {
    let srv = TestServer::spawn().await;
    let res = srv.post("/webhooks/cdek-register?mode=weekly", json!({})).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_provider_is_not_found() {
    let srv = TestServer::spawn().await;
    let res = srv.post("/webhooks/dhl", status_push("1000000001")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
