//! Postgres-backed shipment store.
//!
//! Works against the CRM's `shipments` table:
//!
//! ```sql
//! track              TEXT PRIMARY KEY
//! delivery_method    TEXT NOT NULL
//! status             TEXT NOT NULL
//! send_date          DATE NULL
//! delivered_date     DATE NULL
//! remote_status_code TEXT NULL
//! price              BIGINT NULL   -- minor currency units
//! ```
//!
//! Updates are conditional: a row is only written when at least one patched
//! column differs, so replays and concurrent syncs do not produce spurious
//! writes.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;

use shipsync_core::{DeliveryStatus, ShipmentPatch, ShipmentRecord, TrackNumber};

use super::{CandidateFilter, Candidates, ShipmentStore, StoreError};

const COLUMNS: &str = "track, delivery_method, status, send_date, delivered_date, remote_status_code, price";

#[derive(Debug, Clone)]
pub struct PostgresShipmentStore {
    pool: PgPool,
}

impl PostgresShipmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(PgPool::connect(database_url).await?))
    }

    /// Create the table for local development databases.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shipments (
                track              TEXT PRIMARY KEY,
                delivery_method    TEXT NOT NULL,
                status             TEXT NOT NULL,
                send_date          DATE NULL,
                delivered_date     DATE NULL,
                remote_status_code TEXT NULL,
                price              BIGINT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn terminal_statuses() -> Vec<String> {
    [
        DeliveryStatus::Created,
        DeliveryStatus::InTransit,
        DeliveryStatus::ReadyForPickup,
        DeliveryStatus::Delivered,
        DeliveryStatus::Returning,
        DeliveryStatus::Returned,
        DeliveryStatus::Cancelled,
    ]
    .into_iter()
    .filter(DeliveryStatus::is_terminal)
    .map(|s| s.as_str().to_string())
    .collect()
}

fn record_from_row(row: &PgRow) -> Result<ShipmentRecord, StoreError> {
    let raw_track: String = row.try_get("track")?;
    let corrupt = |reason: String| StoreError::Corrupt {
        track: raw_track.clone(),
        reason,
    };

    let track = TrackNumber::parse(&raw_track).map_err(|e| corrupt(e.to_string()))?;
    let status_raw: String = row.try_get("status")?;
    let status = DeliveryStatus::parse(&status_raw).map_err(|e| corrupt(e.to_string()))?;

    Ok(ShipmentRecord {
        track,
        delivery_method: row.try_get("delivery_method")?,
        status,
        send_date: row.try_get("send_date")?,
        delivered_date: row.try_get("delivered_date")?,
        remote_status_code: row.try_get("remote_status_code")?,
        price: row.try_get("price")?,
    })
}

#[async_trait]
impl ShipmentStore for PostgresShipmentStore {
    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Candidates, StoreError> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM shipments
            WHERE delivery_method = $1
              AND btrim(track) <> ''
              AND ($2 = FALSE OR status <> ALL($3))
            ORDER BY track
            LIMIT $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&filter.delivery_method)
            .bind(filter.only_undelivered)
            .bind(terminal_statuses())
            .bind(filter.limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = Candidates {
            records: Vec::with_capacity(rows.len()),
            unreadable: Vec::new(),
        };
        for row in &rows {
            match record_from_row(row) {
                Ok(record) => candidates.records.push(record),
                Err(e) => {
                    warn!(error = %e, "unreadable shipment row");
                    let track = row.try_get::<String, _>("track").unwrap_or_default();
                    candidates.unreadable.push(track);
                }
            }
        }
        Ok(candidates)
    }

    async fn find_by_track(&self, track: &TrackNumber) -> Result<Option<ShipmentRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM shipments WHERE track = $1");
        let row = sqlx::query(&sql)
            .bind(track.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn apply_patch(&self, track: &TrackNumber, patch: &ShipmentPatch) -> Result<bool, StoreError> {
        if patch.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE shipments SET
                status             = COALESCE($2, status),
                send_date          = COALESCE($3, send_date),
                delivered_date     = COALESCE($4, delivered_date),
                remote_status_code = COALESCE($5, remote_status_code),
                price              = COALESCE($6, price)
            WHERE track = $1
              AND (
                   ($2::text   IS NOT NULL AND status             IS DISTINCT FROM $2)
                OR ($3::date   IS NOT NULL AND send_date          IS DISTINCT FROM $3)
                OR ($4::date   IS NOT NULL AND delivered_date     IS DISTINCT FROM $4)
                OR ($5::text   IS NOT NULL AND remote_status_code IS DISTINCT FROM $5)
                OR ($6::bigint IS NOT NULL AND price              IS DISTINCT FROM $6)
              )
            "#,
        )
        .bind(track.as_str())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.send_date)
        .bind(patch.delivered_date)
        .bind(patch.remote_status_code.as_deref())
        .bind(patch.price)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_match_domain() {
        assert_eq!(terminal_statuses(), vec!["delivered", "returned", "cancelled"]);
    }
}
