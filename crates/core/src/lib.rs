//! `shipsync-core`: delivery tracking domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! shipment records as the CRM stores them, the courier-side view of a shipment,
//! and the field-level diff that decides whether a record needs a write.

pub mod error;
pub mod id;
pub mod shipment;
pub mod sync;

pub use error::{DomainError, DomainResult};
pub use id::TrackNumber;
pub use shipment::{
    DeliveryStatus, RemoteSnapshot, RemoteStatusEntry, ShipmentPatch, ShipmentRecord,
};
pub use sync::{SyncMode, SyncResult, TrackOutcome};
