//! Shipment storage owned by the CRM.
//!
//! The sync path reads candidates and issues conditional updates; it never
//! creates or deletes shipments.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use shipsync_core::{ShipmentPatch, ShipmentRecord, TrackNumber};

pub use in_memory::InMemoryShipmentStore;
pub use postgres::PostgresShipmentStore;

/// Which shipments a sync run looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    pub delivery_method: String,
    /// Exclude shipments already in a terminal status (delta runs).
    pub only_undelivered: bool,
    pub limit: Option<usize>,
}

/// Result of a candidate listing.
///
/// Rows the store could not turn into a `ShipmentRecord` are reported by raw
/// track instead of being dropped, so a run can count them as failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    pub records: Vec<ShipmentRecord>,
    pub unreadable: Vec<String>,
}

impl From<Vec<ShipmentRecord>> for Candidates {
    fn from(records: Vec<ShipmentRecord>) -> Self {
        Self {
            records,
            unreadable: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt shipment row {track}: {reason}")]
    Corrupt { track: String, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ShipmentStore: Send + Sync {
    /// Shipments matching `filter`, ordered by track. `filter.limit` applies
    /// to readable and unreadable rows together.
    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Candidates, StoreError>;

    async fn find_by_track(&self, track: &TrackNumber) -> Result<Option<ShipmentRecord>, StoreError>;

    /// Apply a non-empty patch. Returns `false` when no row was touched
    /// (unknown track, or every value already matched).
    async fn apply_patch(&self, track: &TrackNumber, patch: &ShipmentPatch) -> Result<bool, StoreError>;
}
