use serde::{Deserialize, Serialize};

use shipsync_core::{SyncMode, TrackOutcome};
use shipsync_infra::{ReconcileOptions, SyncOptions};

// -------------------------
// Request DTOs
// -------------------------

/// Push notification sent by the courier.
#[derive(Debug, Deserialize)]
pub struct CourierPush {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Option<PushAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAttributes {
    #[serde(default)]
    pub tracking_number: Option<String>,
}

impl CourierPush {
    pub fn tracking_number(&self) -> Option<&str> {
        self.attributes
            .as_ref()
            .and_then(|a| a.tracking_number.as_deref())
    }
}

/// Query string of `POST /webhooks/<provider>-register`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterQuery {
    pub skip_sync: Option<bool>,
    pub mode: Option<String>,
    pub fast: Option<bool>,
}

impl RegisterQuery {
    pub fn to_options(&self) -> Result<ReconcileOptions, String> {
        let mode = match self.mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("full") => SyncMode::Full,
            Some("delta") => SyncMode::Delta,
            Some(other) => return Err(format!("unknown sync mode {other:?}; expected full or delta")),
        };

        Ok(ReconcileOptions {
            skip_sync: self.skip_sync.unwrap_or(false),
            sync: SyncOptions {
                mode,
                fast: self.fast.unwrap_or(false),
                limit: None,
            },
        })
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PushResponse {
    pub fn ignored(kind: &str) -> Self {
        Self {
            status: "ignored",
            track: None,
            changed: Vec::new(),
            reason: Some(format!("event type {kind} is not handled")),
        }
    }

    /// Response for a successfully handled push. `Failed` outcomes are mapped
    /// to an error response by the handler instead.
    pub fn from_outcome(track: &str, outcome: TrackOutcome) -> Self {
        let (status, changed, reason) = match outcome {
            TrackOutcome::Updated { changed } => ("updated", changed, None),
            TrackOutcome::Unchanged => ("unchanged", Vec::new(), None),
            TrackOutcome::Skipped { reason } => ("skipped", Vec::new(), Some(reason)),
            TrackOutcome::Failed { error } => ("failed", Vec::new(), Some(error)),
        };
        Self {
            status,
            track: Some(track.to_string()),
            changed,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_payload_reads_tracking_number() {
        let push: CourierPush = serde_json::from_str(
            r#"{"type":"ORDER_STATUS","uuid":"x","attributes":{"trackingNumber":"123","code":"DELIVERED"}}"#,
        )
        .unwrap();
        assert_eq!(push.kind, "ORDER_STATUS");
        assert_eq!(push.tracking_number(), Some("123"));
    }

    #[test]
    fn register_query_maps_to_options() {
        let query = RegisterQuery {
            skip_sync: Some(true),
            mode: Some("DELTA".into()),
            fast: Some(true),
        };
        let options = query.to_options().unwrap();
        assert!(options.skip_sync);
        assert_eq!(options.sync.mode, SyncMode::Delta);
        assert!(options.sync.fast);

        let bad = RegisterQuery {
            mode: Some("weekly".into()),
            ..Default::default()
        };
        assert!(bad.to_options().is_err());
    }
}
