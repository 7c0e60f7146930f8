//! Append-only document log.

use crate::error::{StoreError, StoreResult};
use crate::types::DocumentId;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Error as IoError, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Magic bytes for log frames.
const LOG_MAGIC: &[u8; 4] = b"DOC\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Frame flag marking a removal.
const FLAG_TOMBSTONE: u8 = 0b0000_0001;

/// Fixed frame header: magic + version + flags + id + payload length.
const FRAME_HEADER_SIZE: u64 = 4 + 1 + 1 + 12 + 4;

/// Trailing checksum size.
const FRAME_CHECKSUM_SIZE: u64 = 4;

/// Largest payload a frame may declare.
const MAX_PAYLOAD_SIZE: u32 = 100 * 1024 * 1024;

/// One decoded frame. `record` is `None` for a tombstone.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub id: DocumentId,
    pub record: Option<Map<String, Value>>,
}

/// Append-only log of document writes. The last frame for an id wins.
pub struct DocumentLog {
    file: Mutex<File>,

    /// Current file size (next append offset).
    file_size: RwLock<u64>,

    writes_since_sync: Mutex<u64>,

    /// Sync every N appends.
    sync_interval: u64,
}

impl DocumentLog {
    /// Open or create the log at `path`.
    ///
    /// A `sync_interval` of 0 is treated as 1 (sync every append).
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;
        let file_size = file.metadata()?.len();

        Ok(Self {
            file: Mutex::new(file),
            file_size: RwLock::new(file_size),
            writes_since_sync: Mutex::new(0),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Append a write (`Some`) or a tombstone (`None`) for `id`.
    ///
    /// Returns the offset of the new frame.
    pub fn append(&self, id: DocumentId, record: Option<&Map<String, Value>>) -> StoreResult<u64> {
        let (flags, payload) = match record {
            Some(record) => (0u8, serde_json::to_vec(record)?),
            None => (FLAG_TOMBSTONE, Vec::new()),
        };
        let payload_len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_SIZE)
            .ok_or_else(|| StoreError::Rejected(format!("record for {} is too large", id)))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + payload.len() + 4);
        frame.extend_from_slice(LOG_MAGIC);
        frame.push(LOG_VERSION);
        frame.push(flags);
        frame.extend_from_slice(&id.0);
        frame.extend_from_slice(&payload_len.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&checksum(&id, &payload).to_le_bytes());

        let mut file = self.file.lock();
        let mut size = self.file_size.write();
        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&frame)?;
        *size = offset + frame.len() as u64;

        let mut writes = self.writes_since_sync.lock();
        *writes += 1;
        if *writes >= self.sync_interval {
            file.sync_data()?;
            *writes = 0;
        }

        Ok(offset)
    }

    /// Read the frame at `offset`.
    pub fn read_at(&self, offset: u64) -> StoreResult<LogEntry> {
        let available = self.size().saturating_sub(offset);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        read_frame(&mut *file, available).map(|(entry, _)| entry)
    }

    /// Iterate frames from `offset` to the current end of the log.
    pub fn iter_from(&self, offset: u64) -> LogIterator<'_> {
        LogIterator {
            log: self,
            offset,
            end: self.size(),
            failed: false,
        }
    }

    /// Whether an intact frame starts anywhere after `offset`.
    ///
    /// A damaged frame followed by intact ones is corruption, not a torn tail.
    pub fn has_frame_after(&self, offset: u64) -> StoreResult<bool> {
        let end = self.size();
        let start = offset.saturating_add(1);
        if start >= end {
            return Ok(false);
        }

        let mut rest = Vec::new();
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(start))?;
            (&mut *file).take(end - start).read_to_end(&mut rest)?;
        }

        for pos in 0..rest.len() {
            if !rest[pos..].starts_with(LOG_MAGIC) {
                continue;
            }
            let available = (rest.len() - pos) as u64;
            if read_frame(&mut Cursor::new(&rest[pos..]), available).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drop everything from `offset` on, e.g. a torn trailing frame.
    pub fn truncate(&self, offset: u64) -> StoreResult<()> {
        let file = self.file.lock();
        let mut size = self.file_size.write();
        file.set_len(offset)?;
        file.sync_all()?;
        *size = offset;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        *self.file_size.read()
    }

    /// Force pending appends to disk.
    pub fn sync(&self) -> StoreResult<()> {
        self.file.lock().sync_all()?;
        *self.writes_since_sync.lock() = 0;
        Ok(())
    }
}

fn checksum(id: &DocumentId, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&id.0);
    hasher.update(payload);
    hasher.finalize()
}

/// Decode one frame at the reader's position; returns it with its length.
///
/// `available` is the number of log bytes from the frame start to the end of
/// the log. A frame running past it fails with `UnexpectedEof`.
fn read_frame(reader: &mut impl Read, available: u64) -> StoreResult<(LogEntry, u64)> {
    if available < FRAME_HEADER_SIZE {
        return Err(truncated_frame());
    }
    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    reader.read_exact(&mut header)?;

    if &header[0..4] != LOG_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid log frame magic".into()));
    }
    if header[4] != LOG_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported log version: {}",
            header[4]
        )));
    }
    let flags = header[5];

    let mut id = [0u8; 12];
    id.copy_from_slice(&header[6..18]);
    let id = DocumentId(id);

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[18..22]);
    let payload_len = u32::from_le_bytes(len_bytes);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(StoreError::Corruption(format!(
            "log frame for {} declares {} payload bytes",
            id, payload_len
        )));
    }
    let frame_len = FRAME_HEADER_SIZE + u64::from(payload_len) + FRAME_CHECKSUM_SIZE;
    if frame_len > available {
        return Err(truncated_frame());
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload)?;

    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = checksum(&id, &payload);
    if stored != computed {
        return Err(StoreError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    let record = if flags & FLAG_TOMBSTONE != 0 {
        None
    } else {
        match serde_json::from_slice::<Value>(&payload) {
            Ok(Value::Object(record)) => Some(record),
            Ok(_) => {
                return Err(StoreError::Corruption(format!(
                    "record for {} is not an object",
                    id
                )))
            }
            Err(e) => return Err(StoreError::Deserialization(e.to_string())),
        }
    };

    Ok((LogEntry { id, record }, frame_len))
}

fn truncated_frame() -> StoreError {
    StoreError::Io(IoError::new(
        ErrorKind::UnexpectedEof,
        "log frame runs past the end of the log",
    ))
}

/// Iterator over `(offset, entry)` pairs. Stops after the first error.
pub struct LogIterator<'a> {
    log: &'a DocumentLog,
    offset: u64,
    end: u64,
    failed: bool,
}

impl LogIterator<'_> {
    /// Offset of the next frame, or of the frame that failed to decode.
    pub fn position(&self) -> u64 {
        self.offset
    }
}

impl<'a> Iterator for LogIterator<'a> {
    type Item = StoreResult<(u64, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.end {
            return None;
        }

        let current = self.offset;
        let mut file = self.log.file.lock();
        let result = file
            .seek(SeekFrom::Start(current))
            .map_err(StoreError::from)
            .and_then(|_| read_frame(&mut *file, self.end - current));

        match result {
            Ok((entry, frame_len)) => {
                self.offset = current + frame_len;
                Some(Ok((current, entry)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
