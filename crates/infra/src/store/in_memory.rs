use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use shipsync_core::{ShipmentPatch, ShipmentRecord, TrackNumber};

use super::{CandidateFilter, Candidates, ShipmentStore, StoreError};

/// In-memory shipment store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryShipmentStore {
    inner: RwLock<BTreeMap<String, ShipmentRecord>>,
    writes: AtomicUsize,
}

impl InMemoryShipmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ShipmentRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: ShipmentRecord) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(record.track.to_string(), record);
        }
    }

    pub fn get(&self, track: &TrackNumber) -> Option<ShipmentRecord> {
        let map = self.inner.read().ok()?;
        map.get(track.as_str()).cloned()
    }

    /// Number of patches that changed a record.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl ShipmentStore for InMemoryShipmentStore {
    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Candidates, StoreError> {
        let map = self.inner.read().map_err(poisoned)?;
        let matching = map
            .values()
            .filter(|r| r.delivery_method == filter.delivery_method)
            .filter(|r| !(filter.only_undelivered && r.status.is_terminal()))
            .cloned();

        let records: Vec<ShipmentRecord> = match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        };
        Ok(records.into())
    }

    async fn find_by_track(&self, track: &TrackNumber) -> Result<Option<ShipmentRecord>, StoreError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.get(track.as_str()).cloned())
    }

    async fn apply_patch(&self, track: &TrackNumber, patch: &ShipmentPatch) -> Result<bool, StoreError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        let Some(record) = map.get_mut(track.as_str()) else {
            return Ok(false);
        };

        let before = record.clone();
        patch.apply_to(record);
        if *record == before {
            return Ok(false);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipsync_core::DeliveryStatus;

    fn record(track: &str, method: &str, status: DeliveryStatus) -> ShipmentRecord {
        let mut r = ShipmentRecord::new(TrackNumber::parse(track).unwrap(), method);
        r.status = status;
        r
    }

    #[tokio::test]
    async fn candidates_filter_by_method_and_terminal_status() {
        let store = InMemoryShipmentStore::with_records([
            record("1", "courier", DeliveryStatus::InTransit),
            record("2", "courier", DeliveryStatus::Delivered),
            record("3", "pickup", DeliveryStatus::InTransit),
            record("4", "courier", DeliveryStatus::Created),
        ]);

        let mut filter = CandidateFilter {
            delivery_method: "courier".into(),
            only_undelivered: false,
            limit: None,
        };
        let all: Vec<_> = store
            .list_candidates(&filter)
            .await
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.track.to_string())
            .collect();
        assert_eq!(all, vec!["1", "2", "4"]);

        filter.only_undelivered = true;
        filter.limit = Some(1);
        let delta = store.list_candidates(&filter).await.unwrap().records;
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].track.as_str(), "1");
    }

    #[tokio::test]
    async fn patch_counts_only_real_writes() {
        let store = InMemoryShipmentStore::with_records([record("1", "courier", DeliveryStatus::InTransit)]);
        let track = TrackNumber::parse("1").unwrap();

        let patch = ShipmentPatch {
            status: Some(DeliveryStatus::Delivered),
            ..Default::default()
        };
        assert!(store.apply_patch(&track, &patch).await.unwrap());
        assert!(!store.apply_patch(&track, &patch).await.unwrap());
        assert_eq!(store.write_count(), 1);

        let unknown = TrackNumber::parse("nope").unwrap();
        assert!(!store.apply_patch(&unknown, &patch).await.unwrap());
    }
}
