// In-memory catalog store
//
// Implements the full CatalogStore contract over a single RwLock so batch
// inserts are all-or-nothing. Used by tests and by embedders that load the
// catalog from elsewhere. Can be switched to "unavailable" to exercise the
// retryable failure path.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::contracts::{CatalogStore, StoreError, WriteBack};
use crate::types::{DetailRecord, EntityId, LabelRow, NewCatalogEntry};

#[derive(Debug, Default)]
struct State {
    labels: BTreeMap<EntityId, LabelRow>,
    details: BTreeMap<EntityId, DetailRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
    detail_reads: AtomicU64,
    detail_writes: AtomicU64,
    failing_write_backs: AtomicU32,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `get_detail` calls served
    pub fn detail_reads(&self) -> u64 {
        self.detail_reads.load(Ordering::SeqCst)
    }

    /// Number of write-backs applied
    pub fn detail_writes(&self) -> u64 {
        self.detail_writes.load(Ordering::SeqCst)
    }

    /// Fail the next `count` write-backs with `StoreError::Unavailable`
    pub fn fail_write_backs(&self, count: u32) {
        self.failing_write_backs.store(count, Ordering::SeqCst);
    }

    /// Replace a detail record wholesale, as an operator edit would
    pub fn put_detail(&self, record: DetailRecord) {
        self.state.write().details.insert(record.entity_id, record);
    }

    /// Current persisted weight of a label
    pub fn weight_of(&self, id: EntityId) -> Option<u64> {
        self.state.read().labels.get(&id).map(|l| l.weight)
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(operation, "in-memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn load_labels(&self) -> Result<Vec<LabelRow>, StoreError> {
        self.check("load_labels")?;
        Ok(self.state.read().labels.values().cloned().collect())
    }

    async fn load_details(&self) -> Result<Vec<DetailRecord>, StoreError> {
        self.check("load_details")?;
        Ok(self.state.read().details.values().cloned().collect())
    }

    async fn get_detail(&self, id: EntityId) -> Result<Option<DetailRecord>, StoreError> {
        self.check("get_detail")?;
        self.detail_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.read().details.get(&id).cloned())
    }

    async fn write_back(&self, record: &DetailRecord, weight: Option<u64>) -> Result<WriteBack, StoreError> {
        self.check("write_back")?;
        let injected = self
            .failing_write_backs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::unavailable("write_back", "injected write-back failure"));
        }

        let mut state = self.state.write();
        let id = record.entity_id;
        // Check everything before mutating so a rejection writes nothing
        match state.details.get(&id) {
            None => {
                return Err(StoreError::Rejected {
                    operation: "write_back",
                    reason: format!("no detail record for entity {id}"),
                })
            }
            Some(existing) if existing.manually_modified => return Ok(WriteBack::Blocked),
            Some(_) => {}
        }
        if weight.is_some() && !state.labels.contains_key(&id) {
            return Err(StoreError::Rejected {
                operation: "write_back",
                reason: format!("no label for entity {id}"),
            });
        }

        if let Some(existing) = state.details.get_mut(&id) {
            existing.developer = record.developer.clone();
            existing.publisher = record.publisher.clone();
            existing.genre = record.genre.clone();
            existing.release_date = record.release_date;
            existing.verified |= record.verified;
        }
        if let (Some(weight), Some(label)) = (weight, state.labels.get_mut(&id)) {
            label.weight = weight;
        }
        self.detail_writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteBack::Applied)
    }

    async fn update_weight(&self, id: EntityId, weight: u64) -> Result<(), StoreError> {
        self.check("update_weight")?;
        match self.state.write().labels.get_mut(&id) {
            Some(label) => {
                label.weight = weight;
                Ok(())
            }
            None => Err(StoreError::Rejected {
                operation: "update_weight",
                reason: format!("no label for entity {id}"),
            }),
        }
    }

    async fn insert_batch(&self, entries: &[NewCatalogEntry]) -> Result<(), StoreError> {
        self.check("insert_batch")?;
        let mut state = self.state.write();

        // Validate the whole batch before touching state
        let mut keys: HashSet<String> = state
            .labels
            .values()
            .map(|l| l.search_key.as_str().to_lowercase())
            .collect();
        let mut ids: HashSet<EntityId> = state.labels.keys().copied().collect();
        for entry in entries {
            if !keys.insert(entry.label.search_key.as_str().to_lowercase()) {
                return Err(StoreError::Rejected {
                    operation: "insert_batch",
                    reason: format!("duplicate search key {}", entry.label.search_key),
                });
            }
            if !ids.insert(entry.label.entity_id) {
                return Err(StoreError::Rejected {
                    operation: "insert_batch",
                    reason: format!("duplicate entity id {}", entry.label.entity_id),
                });
            }
        }

        for entry in entries {
            state.labels.insert(entry.label.entity_id, entry.label.clone());
            state.details.insert(entry.detail.entity_id, entry.detail.clone());
        }
        Ok(())
    }

    async fn max_entity_id(&self) -> Result<Option<EntityId>, StoreError> {
        self.check("max_entity_id")?;
        Ok(self.state.read().details.keys().next_back().copied())
    }

    async fn search_keys(&self) -> Result<Vec<String>, StoreError> {
        self.check("search_keys")?;
        Ok(self
            .state
            .read()
            .labels
            .values()
            .map(|l| l.search_key.as_str().to_string())
            .collect())
    }
}
