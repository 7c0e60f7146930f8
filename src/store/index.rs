//! Persistent id → log offset index.

use crate::error::{StoreError, StoreResult};
use crate::types::DocumentId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for index files.
const INDEX_MAGIC: &[u8; 4] = b"DIX\0";

/// Current index format version.
const INDEX_VERSION: u8 = 1;

/// Magic + version + body length.
const INDEX_HEADER_SIZE: u64 = 4 + 1 + 8;

/// On-disk body, MessagePack encoded.
#[derive(Serialize, Deserialize)]
struct IndexFile {
    /// Log size the entries were taken at.
    log_size: u64,
    entries: Vec<(DocumentId, u64)>,
}

/// Offsets of the latest live frame of each document.
pub struct DocumentIndex {
    path: PathBuf,
    offsets: RwLock<HashMap<DocumentId, u64>>,
}

impl DocumentIndex {
    /// Empty index that will be saved to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offsets: RwLock::new(HashMap::new()),
        }
    }

    /// Load a saved index along with the log size it was saved at.
    ///
    /// Returns `None` if no index file exists.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Option<(Self, u64)>> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid index magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != INDEX_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported index version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);
        if len > file_len.saturating_sub(INDEX_HEADER_SIZE) {
            return Err(StoreError::InvalidFormat(format!(
                "Index body length {} exceeds file size {}",
                len, file_len
            )));
        }

        let mut encoded = vec![0u8; len as usize];
        file.read_exact(&mut encoded)?;
        let body: IndexFile = rmp_serde::from_slice(&encoded)?;

        let index = Self {
            path,
            offsets: RwLock::new(body.entries.into_iter().collect()),
        };
        Ok(Some((index, body.log_size)))
    }

    pub fn insert(&self, id: DocumentId, offset: u64) {
        self.offsets.write().insert(id, offset);
    }

    pub fn remove(&self, id: DocumentId) -> Option<u64> {
        self.offsets.write().remove(&id)
    }

    pub fn get(&self, id: DocumentId) -> Option<u64> {
        self.offsets.read().get(&id).copied()
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.offsets.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.offsets.read().len()
    }

    pub fn clear(&self) {
        self.offsets.write().clear();
    }

    /// Write the index, recording `log_size` for staleness checks on load.
    pub fn save(&self, log_size: u64) -> StoreResult<()> {
        let body = IndexFile {
            log_size,
            entries: self.offsets.read().iter().map(|(id, off)| (*id, *off)).collect(),
        };
        let encoded = rmp_serde::to_vec(&body)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        file.write_all(INDEX_MAGIC)?;
        file.write_all(&[INDEX_VERSION])?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&encoded)?;

        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_insert_and_lookup() {
        let dir = TempDir::new().unwrap();
        let index = DocumentIndex::new(dir.path().join("documents.idx"));
        let id = DocumentId::new();

        assert!(!index.contains(id));
        index.insert(id, 0);
        index.insert(id, 120);
        assert_eq!(index.get(id), Some(120));
        assert_eq!(index.len(), 1);

        assert_eq!(index.remove(id), Some(120));
        assert_eq!(index.get(id), None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("documents.idx");
        let a = DocumentId::new();
        let b = DocumentId::new();

        {
            let index = DocumentIndex::new(&path);
            index.insert(a, 0);
            index.insert(b, 64);
            index.save(128).unwrap();
        }

        let (index, log_size) = DocumentIndex::load(&path).unwrap().unwrap();
        assert_eq!(log_size, 128);
        assert_eq!(index.get(a), Some(0));
        assert_eq!(index.get(b), Some(64));
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("documents.idx");
        assert!(DocumentIndex::load(&path).unwrap().is_none());

        std::fs::write(&path, b"nope").unwrap();
        assert!(matches!(
            DocumentIndex::load(&path),
            Err(StoreError::InvalidFormat(_))
        ));

        // Body length far beyond what the file holds
        let mut oversized = Vec::new();
        oversized.extend_from_slice(INDEX_MAGIC);
        oversized.push(INDEX_VERSION);
        oversized.extend_from_slice(&u64::MAX.to_le_bytes());
        oversized.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, &oversized).unwrap();
        assert!(matches!(
            DocumentIndex::load(&path),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}
