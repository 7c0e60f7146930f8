//! In-memory document store.

use super::DocumentStore;
use crate::error::StoreResult;
use crate::types::DocumentId;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Document store backed by a hash map. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<DocumentId, Map<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl DocumentStore for MemoryStore {
    fn put(&self, id: DocumentId, record: &Map<String, Value>) -> StoreResult<()> {
        self.records.write().insert(id, record.clone());
        Ok(())
    }

    fn get(&self, id: DocumentId) -> StoreResult<Option<Map<String, Value>>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn remove(&self, id: DocumentId) -> StoreResult<bool> {
        Ok(self.records.write().remove(&id).is_some())
    }

    fn contains(&self, id: DocumentId) -> StoreResult<bool> {
        Ok(self.records.read().contains_key(&id))
    }
}
