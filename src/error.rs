//! Error types for revision tracking and document persistence.

use crate::types::DocumentId;
use thiserror::Error;

/// Errors raised by a [`DocumentStore`](crate::store::DocumentStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Store rejected write: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Main error type for revision operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The store rejected a save or reload.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// A type name (source type or `_type` discriminator) could not be resolved.
    #[error("Type resolution failed: {0}")]
    TypeResolution(String),

    /// Revision history is inconsistent with its ordering guarantees.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unknown relation {relation} on {type_name}")]
    UnknownRelation { type_name: String, relation: String },

    #[error("Field name is reserved: {0}")]
    ReservedField(String),

    #[error("Historical documents cannot be persisted")]
    HistoricalDocument,

    /// A persisted record or revision envelope does not have the expected shape.
    #[error("Corrupted document data: {0}")]
    Corruption(String),

    #[error("Invalid registry configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Corruption(e.to_string())
    }
}

/// Result type for revision operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for store backends.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
