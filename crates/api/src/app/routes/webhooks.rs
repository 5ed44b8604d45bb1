use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{debug, warn};

use shipsync_core::{TrackNumber, TrackOutcome};
use shipsync_infra::courier::ORDER_STATUS_WEBHOOK;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// `POST /webhooks/:provider`
///
/// `<provider>` receives courier pushes; `<provider>-register` triggers an
/// on-demand webhook reconcile.
pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Path(provider): Path<String>,
    query: Result<Query<dto::RegisterQuery>, QueryRejection>,
    body: Bytes,
) -> axum::response::Response {
    if provider == services.register_route() {
        let Query(query) = match query {
            Ok(q) => q,
            Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", e.body_text()),
        };
        return register(services, query).await;
    }
    if provider == services.provider {
        return push(services, &body).await;
    }
    errors::json_error(
        StatusCode::NOT_FOUND,
        "unknown_provider",
        format!("no webhook handler for provider {provider}"),
    )
}

async fn push(services: Arc<AppServices>, body: &[u8]) -> axum::response::Response {
    let push: dto::CourierPush = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_payload", e.to_string()),
    };

    if push.kind != ORDER_STATUS_WEBHOOK {
        debug!(kind = %push.kind, "ignoring courier push");
        return (StatusCode::OK, Json(dto::PushResponse::ignored(&push.kind))).into_response();
    }

    let track = match push.tracking_number().map(TrackNumber::parse) {
        Some(Ok(track)) => track,
        Some(Err(e)) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_track", e.to_string()),
        None => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_payload",
                "attributes.trackingNumber is required",
            );
        }
    };

    match services.sync.sync_single(&track).await {
        Ok(TrackOutcome::Failed { error }) => {
            warn!(track = %track, error = %error, "push sync failed");
            errors::json_error(StatusCode::BAD_GATEWAY, "upstream_error", error)
        }
        Ok(outcome) => {
            let response = dto::PushResponse::from_outcome(track.as_str(), outcome);
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => errors::sync_error_to_response(e),
    }
}

async fn register(services: Arc<AppServices>, query: dto::RegisterQuery) -> axum::response::Response {
    let options = match query.to_options() {
        Ok(o) => o,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", msg),
    };

    match services.reconciler.reconcile(options).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::reconcile_error_to_response(e),
    }
}
