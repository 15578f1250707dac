use super::{EntityStore, RefreshMetadata, StoreError};
use crate::state::StateRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::RwLock;

/// In-process remote store backed by a concurrent map.
///
/// Always reachable. Listing order is by id so results are deterministic.
#[derive(Default)]
pub struct MemoryEntityStore {
    states: DashMap<String, StateRecord>,
    metadata: RwLock<Option<RefreshMetadata>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`
    pub fn with_records(records: Vec<StateRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.states.insert(record.id.clone(), record);
        }
        store
    }

    /// Get state by id
    pub fn get(&self, id: &str) -> Option<StateRecord> {
        self.states.get(id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn list_all(&self) -> Result<Vec<StateRecord>, StoreError> {
        let mut records: Vec<StateRecord> =
            self.states.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn upsert(&self, record: &StateRecord) -> Result<(), StoreError> {
        self.states.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn read_metadata(&self) -> Result<Option<RefreshMetadata>, StoreError> {
        let metadata = self
            .metadata
            .read()
            .map_err(|_| StoreError::Unavailable("metadata lock poisoned".to_string()))?;
        Ok(*metadata)
    }

    async fn write_metadata(&self, metadata: &RefreshMetadata) -> Result<(), StoreError> {
        let mut current = self
            .metadata
            .write()
            .map_err(|_| StoreError::Unavailable("metadata lock poisoned".to_string()))?;
        *current = Some(*metadata);
        Ok(())
    }
}
