//! Shipment records and the courier-side view of a shipment.
//!
//! The CRM owns `ShipmentRecord`s; this crate never creates or deletes them.
//! The sync path folds the courier's status history into a `RemoteSnapshot`,
//! diffs it against the stored record, and emits a `ShipmentPatch` that only
//! carries fields which actually changed. An empty patch means "no write".

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TrackNumber;

/// Delivery status as the CRM tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Order registered with the courier, not yet handed over.
    Created,
    /// Parcel is moving through the courier network.
    InTransit,
    /// Parcel is waiting at a pick-up point.
    ReadyForPickup,
    Delivered,
    /// Delivery failed; parcel is on its way back.
    Returning,
    Returned,
    Cancelled,
}

/// Courier codes that mean the parcel physically left the sender.
///
/// The first of these in the history becomes the record's send date.
const HANDOVER_CODES: &[&str] = &[
    "RECEIVED_AT_SHIPMENT_WAREHOUSE",
    "READY_TO_SHIP_AT_SENDING_OFFICE",
    "TAKEN_BY_TRANSPORTER_FROM_SENDER_CITY",
    "SENT_TO_TRANSIT_CITY",
    "SENT_TO_RECIPIENT_CITY",
    "PASSED_TO_CARRIER",
];

const DELIVERED_CODE: &str = "DELIVERED";

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InTransit => "in_transit",
            Self::ReadyForPickup => "ready_for_pickup",
            Self::Delivered => "delivered",
            Self::Returning => "returning",
            Self::Returned => "returned",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "created" => Ok(Self::Created),
            "in_transit" => Ok(Self::InTransit),
            "ready_for_pickup" => Ok(Self::ReadyForPickup),
            "delivered" => Ok(Self::Delivered),
            "returning" => Ok(Self::Returning),
            "returned" => Ok(Self::Returned),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }

    /// Terminal statuses are excluded from delta syncs.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Returned | Self::Cancelled)
    }

    /// Map a courier status code onto the CRM status.
    ///
    /// Returns `None` for codes that carry no status meaning for the CRM; the
    /// stored status is then left as is while the raw code is still recorded.
    pub fn from_remote_code(code: &str) -> Option<Self> {
        let status = match code {
            "CREATED" | "ACCEPTED" => Self::Created,
            "RECEIVED_AT_SHIPMENT_WAREHOUSE"
            | "READY_TO_SHIP_AT_SENDING_OFFICE"
            | "TAKEN_BY_TRANSPORTER_FROM_SENDER_CITY"
            | "SENT_TO_TRANSIT_CITY"
            | "ACCEPTED_IN_TRANSIT_CITY"
            | "ACCEPTED_AT_TRANSIT_WAREHOUSE"
            | "SENT_TO_RECIPIENT_CITY"
            | "ACCEPTED_IN_RECIPIENT_CITY"
            | "ACCEPTED_AT_RECIPIENT_CITY_WAREHOUSE"
            | "TAKEN_BY_COURIER"
            | "PASSED_TO_CARRIER" => Self::InTransit,
            "ACCEPTED_AT_PICK_UP_POINT" | "POSTOMAT_POSTED" => Self::ReadyForPickup,
            DELIVERED_CODE => Self::Delivered,
            "NOT_DELIVERED" | "RETURNED_TO_SENDER_CITY_WAREHOUSE" => Self::Returning,
            "RETURNED" | "RETURNED_TO_SENDER" => Self::Returned,
            "INVALID" | "CANCELLED" | "REMOVED" => Self::Cancelled,
            _ => return None,
        };
        Some(status)
    }
}

impl core::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shipment as stored by the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRecord {
    pub track: TrackNumber,
    /// CRM delivery method (only the courier's method is synced).
    pub delivery_method: String,
    pub status: DeliveryStatus,
    pub send_date: Option<NaiveDate>,
    pub delivered_date: Option<NaiveDate>,
    pub remote_status_code: Option<String>,
    /// Shipment price in minor currency units.
    pub price: Option<i64>,
}

impl ShipmentRecord {
    pub fn new(track: TrackNumber, delivery_method: impl Into<String>) -> Self {
        Self {
            track,
            delivery_method: delivery_method.into(),
            status: DeliveryStatus::Created,
            send_date: None,
            delivered_date: None,
            remote_status_code: None,
            price: None,
        }
    }

    /// Compute the patch that brings this record in line with the courier.
    ///
    /// A field is only included when the remote side knows a value and that
    /// value differs from the stored one; remote gaps never clear local data.
    pub fn diff(&self, remote: &RemoteSnapshot) -> ShipmentPatch {
        fn changed<T: PartialEq + Clone>(local: &Option<T>, remote: &Option<T>) -> Option<T> {
            match remote {
                Some(r) if local.as_ref() != Some(r) => Some(r.clone()),
                _ => None,
            }
        }

        ShipmentPatch {
            status: remote.status.filter(|s| *s != self.status),
            send_date: changed(&self.send_date, &remote.send_date),
            delivered_date: changed(&self.delivered_date, &remote.delivered_date),
            remote_status_code: changed(&self.remote_status_code, &remote.remote_status_code),
            price: changed(&self.price, &remote.price),
        }
    }
}

/// One entry of the courier's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatusEntry {
    pub code: String,
    pub at: DateTime<Utc>,
}

/// The courier's authoritative view of a shipment, reduced to the fields the
/// CRM stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    pub status: Option<DeliveryStatus>,
    pub send_date: Option<NaiveDate>,
    pub delivered_date: Option<NaiveDate>,
    pub remote_status_code: Option<String>,
    pub price: Option<i64>,
}

impl RemoteSnapshot {
    /// Fold a status history (any order) and the order total into a snapshot.
    ///
    /// `total_sum` is in major currency units as the courier reports it.
    pub fn from_history(history: &[RemoteStatusEntry], total_sum: Option<f64>) -> Self {
        let mut ordered: Vec<&RemoteStatusEntry> = history.iter().collect();
        ordered.sort_by_key(|e| e.at);

        let latest = ordered.last();
        let send_date = ordered
            .iter()
            .find(|e| HANDOVER_CODES.contains(&e.code.as_str()))
            .map(|e| e.at.date_naive());
        let delivered_date = ordered
            .iter()
            .rev()
            .find(|e| e.code == DELIVERED_CODE)
            .map(|e| e.at.date_naive());

        Self {
            status: latest.and_then(|e| DeliveryStatus::from_remote_code(&e.code)),
            send_date,
            delivered_date,
            remote_status_code: latest.map(|e| e.code.clone()),
            price: total_sum
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| (v * 100.0).round() as i64),
        }
    }
}

/// Conditional update for a single shipment. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentPatch {
    pub status: Option<DeliveryStatus>,
    pub send_date: Option<NaiveDate>,
    pub delivered_date: Option<NaiveDate>,
    pub remote_status_code: Option<String>,
    pub price: Option<i64>,
}

impl ShipmentPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.send_date.is_none()
            && self.delivered_date.is_none()
            && self.remote_status_code.is_none()
            && self.price.is_none()
    }

    /// Names of the fields this patch touches (for logging / responses).
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push("status");
        }
        if self.send_date.is_some() {
            fields.push("sendDate");
        }
        if self.delivered_date.is_some() {
            fields.push("deliveredDate");
        }
        if self.remote_status_code.is_some() {
            fields.push("remoteStatusCode");
        }
        if self.price.is_some() {
            fields.push("price");
        }
        fields
    }

    pub fn apply_to(&self, record: &mut ShipmentRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(d) = self.send_date {
            record.send_date = Some(d);
        }
        if let Some(d) = self.delivered_date {
            record.delivered_date = Some(d);
        }
        if let Some(code) = &self.remote_status_code {
            record.remote_status_code = Some(code.clone());
        }
        if let Some(price) = self.price {
            record.price = Some(price);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn entry(code: &str, day: u32, hour: u32) -> RemoteStatusEntry {
        RemoteStatusEntry {
            code: code.to_string(),
            at: at(day, hour),
        }
    }

    fn record() -> ShipmentRecord {
        ShipmentRecord::new(TrackNumber::parse("1000000001").unwrap(), "courier")
    }

    #[test]
    fn snapshot_folds_unordered_history() {
        let history = vec![
            entry("DELIVERED", 9, 15),
            entry("CREATED", 1, 10),
            entry("RECEIVED_AT_SHIPMENT_WAREHOUSE", 2, 12),
            entry("SENT_TO_RECIPIENT_CITY", 4, 8),
        ];

        let snap = RemoteSnapshot::from_history(&history, Some(349.99));

        assert_eq!(snap.status, Some(DeliveryStatus::Delivered));
        assert_eq!(snap.remote_status_code.as_deref(), Some("DELIVERED"));
        assert_eq!(snap.send_date, NaiveDate::from_ymd_opt(2024, 3, 2));
        assert_eq!(snap.delivered_date, NaiveDate::from_ymd_opt(2024, 3, 9));
        assert_eq!(snap.price, Some(34999));
    }

    #[test]
    fn unknown_latest_code_keeps_status_unset_but_records_code() {
        let history = vec![entry("CREATED", 1, 10), entry("SOME_NEW_CODE", 2, 10)];
        let snap = RemoteSnapshot::from_history(&history, None);

        assert_eq!(snap.status, None);
        assert_eq!(snap.remote_status_code.as_deref(), Some("SOME_NEW_CODE"));
        assert_eq!(snap.price, None);
    }

    #[test]
    fn diff_only_reports_changed_fields() {
        let mut rec = record();
        rec.status = DeliveryStatus::InTransit;
        rec.send_date = NaiveDate::from_ymd_opt(2024, 3, 2);
        rec.remote_status_code = Some("SENT_TO_RECIPIENT_CITY".into());
        rec.price = Some(34999);

        let snap = RemoteSnapshot::from_history(
            &[
                entry("RECEIVED_AT_SHIPMENT_WAREHOUSE", 2, 12),
                entry("DELIVERED", 9, 15),
            ],
            Some(349.99),
        );

        let patch = rec.diff(&snap);
        assert_eq!(
            patch.changed_fields(),
            vec!["status", "deliveredDate", "remoteStatusCode"]
        );
    }

    #[test]
    fn remote_gaps_never_clear_local_values() {
        let mut rec = record();
        rec.price = Some(1000);
        rec.delivered_date = NaiveDate::from_ymd_opt(2024, 1, 1);

        let patch = rec.diff(&RemoteSnapshot::default());
        assert!(patch.is_empty());
    }

    #[test]
    fn terminal_statuses() {
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Cancelled.is_terminal());
        assert!(!DeliveryStatus::Returning.is_terminal());
        assert_eq!(
            DeliveryStatus::parse(DeliveryStatus::ReadyForPickup.as_str()).unwrap(),
            DeliveryStatus::ReadyForPickup
        );
    }

    fn arb_code() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "CREATED",
            "RECEIVED_AT_SHIPMENT_WAREHOUSE",
            "SENT_TO_RECIPIENT_CITY",
            "ACCEPTED_AT_PICK_UP_POINT",
            "DELIVERED",
            "NOT_DELIVERED",
            "UNMAPPED_CODE",
        ])
        .prop_map(str::to_string)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: applying the diff makes the record agree with the remote
        /// view, so a second diff is always empty (repeated syncs are no-ops).
        #[test]
        fn applying_diff_converges(
            history in prop::collection::vec((arb_code(), 1u32..28, 0u32..24), 0..8),
            total in prop::option::of(0.0f64..100_000.0),
        ) {
            let history: Vec<RemoteStatusEntry> = history
                .into_iter()
                .map(|(code, day, hour)| entry(&code, day, hour))
                .collect();
            let snap = RemoteSnapshot::from_history(&history, total);

            let mut rec = record();
            let patch = rec.diff(&snap);
            patch.apply_to(&mut rec);

            prop_assert!(rec.diff(&snap).is_empty());
        }
    }
}
