//! Document storage backends.
//!
//! The repository only needs keyed put/get/remove of persisted records;
//! [`MemoryStore`] keeps them in a map and [`FileStore`] in an append-only
//! log on disk.

mod file;
mod index;
mod log;
mod memory;

pub use file::{FileStore, StoreConfig};
pub use memory::MemoryStore;

use crate::error::StoreResult;
use crate::types::DocumentId;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Keyed storage of persisted document records.
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the record stored under `id`.
    fn put(&self, id: DocumentId, record: &Map<String, Value>) -> StoreResult<()>;

    fn get(&self, id: DocumentId) -> StoreResult<Option<Map<String, Value>>>;

    /// Remove the record; returns whether one was present.
    fn remove(&self, id: DocumentId) -> StoreResult<bool>;

    fn contains(&self, id: DocumentId) -> StoreResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Flush pending writes to durable storage.
    fn sync(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn put(&self, id: DocumentId, record: &Map<String, Value>) -> StoreResult<()> {
        (**self).put(id, record)
    }

    fn get(&self, id: DocumentId) -> StoreResult<Option<Map<String, Value>>> {
        (**self).get(id)
    }

    fn remove(&self, id: DocumentId) -> StoreResult<bool> {
        (**self).remove(id)
    }

    fn contains(&self, id: DocumentId) -> StoreResult<bool> {
        (**self).contains(id)
    }

    fn sync(&self) -> StoreResult<()> {
        (**self).sync()
    }
}
