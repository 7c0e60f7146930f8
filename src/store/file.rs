//! On-disk document store: a log, an index and a cache in one directory.

use super::index::DocumentIndex;
use super::log::DocumentLog;
use super::DocumentStore;
use crate::error::{StoreError, StoreResult};
use crate::types::DocumentId;
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"DRV\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const LOG_FILE: &str = "documents.log";
const INDEX_FILE: &str = "documents.idx";

/// File store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the store.
    pub path: PathBuf,

    /// Decoded records kept in memory.
    pub cache_size: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Sync the log every N writes.
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./documents"),
            cache_size: 1000,
            create_if_missing: true,
            sync_interval: 100,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Document store persisted in a directory.
///
/// Holds an exclusive lock on the directory while open. The index is
/// written on [`flush`](Self::flush) and on drop; if it is missing or
/// behind the log when the store is opened, it is rebuilt from the log.
pub struct FileStore {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    log: DocumentLog,
    index: DocumentIndex,
    cache: Mutex<LruCache<DocumentId, Map<String, Value>>>,

    /// Serializes log append + index update.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> StoreResult<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new, empty store.
    pub fn create(config: StoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let log = DocumentLog::open(config.path.join(LOG_FILE), config.sync_interval)?;
        let index = DocumentIndex::new(config.path.join(INDEX_FILE));
        if log.size() > 0 {
            Self::rebuild_index(&log, &index)?;
        }

        debug!(path = %config.path.display(), "created document store");
        Ok(Self::assemble(config, lock_file, log, index))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let log = DocumentLog::open(config.path.join(LOG_FILE), config.sync_interval)?;
        let index_path = config.path.join(INDEX_FILE);
        let index = match DocumentIndex::load(&index_path) {
            Ok(Some((index, log_size))) if log_size == log.size() => index,
            Ok(Some((index, log_size))) => {
                warn!(
                    indexed = log_size,
                    log = log.size(),
                    "document index is behind the log, rebuilding"
                );
                Self::rebuild_index(&log, &index)?;
                index
            }
            Ok(None) => {
                let index = DocumentIndex::new(&index_path);
                Self::rebuild_index(&log, &index)?;
                index
            }
            Err(e) => {
                warn!(error = %e, "document index unreadable, rebuilding");
                let index = DocumentIndex::new(&index_path);
                Self::rebuild_index(&log, &index)?;
                index
            }
        };

        debug!(path = %config.path.display(), documents = index.len(), "opened document store");
        Ok(Self::assemble(config, lock_file, log, index))
    }

    fn assemble(config: StoreConfig, lock_file: File, log: DocumentLog, index: DocumentIndex) -> Self {
        let cache_size = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            _lock_file: lock_file,
            log,
            index,
            cache: Mutex::new(LruCache::new(cache_size)),
            write_lock: Mutex::new(()),
        }
    }

    /// Replay the log into `index`, dropping a torn trailing frame.
    ///
    /// Only a damaged frame with nothing intact after it counts as torn.
    fn rebuild_index(log: &DocumentLog, index: &DocumentIndex) -> StoreResult<()> {
        index.clear();
        let mut frames = log.iter_from(0);
        while let Some(result) = frames.next() {
            match result {
                Ok((offset, entry)) => match entry.record {
                    Some(_) => index.insert(entry.id, offset),
                    None => {
                        index.remove(entry.id);
                    }
                },
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    let at = frames.position();
                    if log.has_frame_after(at)? {
                        return Err(StoreError::Corruption(format!(
                            "damaged frame at offset {} is followed by intact frames",
                            at
                        )));
                    }
                    warn!(offset = at, "discarding incomplete frame at end of document log");
                    log.truncate(at)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        index.save(log.size())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sync the log and persist the index.
    pub fn flush(&self) -> StoreResult<()> {
        let _lock = self.write_lock.lock();
        self.log.sync()?;
        self.index.save(self.log.size())
    }

    fn write_manifest(path: &Path) -> StoreResult<()> {
        use std::io::Write;

        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> StoreResult<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(StoreError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> StoreResult<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }
}

impl DocumentStore for FileStore {
    fn put(&self, id: DocumentId, record: &Map<String, Value>) -> StoreResult<()> {
        let _lock = self.write_lock.lock();
        let offset = self.log.append(id, Some(record))?;
        self.index.insert(id, offset);
        self.cache.lock().put(id, record.clone());
        Ok(())
    }

    fn get(&self, id: DocumentId) -> StoreResult<Option<Map<String, Value>>> {
        if let Some(cached) = self.cache.lock().get(&id).cloned() {
            return Ok(Some(cached));
        }

        let offset = match self.index.get(id) {
            Some(offset) => offset,
            None => return Ok(None),
        };

        let entry = self.log.read_at(offset)?;
        if entry.id != id {
            return Err(StoreError::Corruption(format!(
                "index points {} at a frame for {}",
                id, entry.id
            )));
        }
        let record = entry.record.ok_or_else(|| {
            StoreError::Corruption(format!("index points {} at a tombstone", id))
        })?;

        self.cache.lock().put(id, record.clone());
        Ok(Some(record))
    }

    fn remove(&self, id: DocumentId) -> StoreResult<bool> {
        let _lock = self.write_lock.lock();
        if !self.index.contains(id) {
            return Ok(false);
        }
        self.log.append(id, None)?;
        self.index.remove(id);
        self.cache.lock().pop(&id);
        Ok(true)
    }

    fn contains(&self, id: DocumentId) -> StoreResult<bool> {
        Ok(self.index.contains(id))
    }

    fn sync(&self) -> StoreResult<()> {
        self.flush()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Best-effort flush on drop
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> FileStore {
        FileStore::open_or_create(StoreConfig {
            path: dir.path().join("store"),
            cache_size: 4,
            sync_interval: 1,
            ..Default::default()
        })
        .unwrap()
    }

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = DocumentId::new();

        store.put(id, &record(json!({"name": "Ada"}))).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap()["name"], json!("Ada"));
        assert!(store.contains(id).unwrap());
        assert_eq!(store.len(), 1);

        store.put(id, &record(json!({"name": "Grace"}))).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap()["name"], json!("Grace"));
        assert_eq!(store.len(), 1);

        assert_eq!(store.get(DocumentId::new()).unwrap(), None);
    }

    #[test]
    fn test_reads_past_cache() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let ids: Vec<_> = (0..10).map(|_| DocumentId::new()).collect();

        for (i, id) in ids.iter().enumerate() {
            store.put(*id, &record(json!({"i": i}))).unwrap();
        }
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(store.get(*id).unwrap().unwrap()["i"], json!(i));
        }
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = DocumentId::new();

        store.put(id, &record(json!({"v": 1}))).unwrap();
        assert!(store.remove(id).unwrap());
        assert!(!store.remove(id).unwrap());
        assert_eq!(store.get(id).unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_locked_while_open() {
        let dir = TempDir::new().unwrap();
        let _store = test_store(&dir);
        let second = FileStore::open(StoreConfig::at(dir.path().join("store")));
        assert!(matches!(second, Err(StoreError::Locked)));
    }

    #[test]
    fn test_missing_store() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().join("absent"),
            create_if_missing: false,
            ..Default::default()
        };
        assert!(matches!(
            FileStore::open_or_create(config),
            Err(StoreError::NotInitialized)
        ));
    }

    #[test]
    fn test_invalid_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("MANIFEST"), b"XXXX\x01").unwrap();
        assert!(matches!(
            FileStore::open(StoreConfig::at(&path)),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}
