use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use shipsync_infra::{ReconcileError, SyncError};

pub fn reconcile_error_to_response(err: ReconcileError) -> axum::response::Response {
    match err {
        ReconcileError::MissingCallbackUrl => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "not_configured",
            err.to_string(),
        ),
        ReconcileError::Courier(e) => json_error(StatusCode::BAD_GATEWAY, "upstream_error", e.to_string()),
        ReconcileError::Lock(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "lock_error", e.to_string()),
        ReconcileError::Sync(e) => sync_error_to_response(e),
    }
}

pub fn sync_error_to_response(err: SyncError) -> axum::response::Response {
    match err {
        SyncError::Config(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
        SyncError::Lock(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "lock_error", e.to_string()),
        SyncError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
