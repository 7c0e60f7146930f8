//! Revision records: one captured past state of a document.

use crate::document::{reconstruct, Document, REVISION_METADATA_FIELD};
use crate::error::{Error, Result};
use crate::schema::TypeRegistry;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Metadata stored alongside captured attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    /// When the revision was captured.
    pub captured_at: Timestamp,

    /// Type of the document the revision was captured from.
    pub source_type: String,

    /// The document's `revision_idx` at capture time.
    pub idx: u64,
}

/// An immutable snapshot of a document's attributes.
///
/// Cloning is cheap; the attribute map is shared.
#[derive(Clone, PartialEq)]
pub struct Revision {
    attributes: Arc<Map<String, Value>>,
    metadata: RevisionMetadata,
}

impl Revision {
    pub(crate) fn new(attributes: Map<String, Value>, metadata: RevisionMetadata) -> Self {
        Self {
            attributes: Arc::new(attributes),
            metadata,
        }
    }

    /// Captured attributes, without the metadata block.
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn metadata(&self) -> &RevisionMetadata {
        &self.metadata
    }

    pub fn idx(&self) -> u64 {
        self.metadata.idx
    }

    pub fn captured_at(&self) -> Timestamp {
        self.metadata.captured_at
    }

    pub fn source_type(&self) -> &str {
        &self.metadata.source_type
    }

    /// Rebuild the document as it was when this revision was captured.
    ///
    /// The result is detached: `updated_at` is the capture time and
    /// [`Document::current_revision`] points back at this revision.
    pub fn reify(&self, registry: &TypeRegistry) -> Result<Document> {
        let mut doc = reconstruct(registry, &self.metadata.source_type, &self.attributes)?;
        if doc.flags.timestamps {
            doc.updated_at = Some(self.metadata.captured_at);
        }
        doc.revision = Some(self.clone());
        Ok(doc)
    }

    /// Persisted form: the attributes plus a `_revision_metadata` block.
    pub(crate) fn to_envelope(&self) -> Value {
        let mut envelope = (*self.attributes).clone();
        // RevisionMetadata only holds plain values, so this cannot fail
        let metadata = serde_json::to_value(&self.metadata).unwrap_or(Value::Null);
        envelope.insert(REVISION_METADATA_FIELD.to_string(), metadata);
        Value::Object(envelope)
    }

    pub(crate) fn from_envelope(envelope: &Value) -> Result<Self> {
        let mut attributes = envelope
            .as_object()
            .cloned()
            .ok_or_else(|| Error::Corruption(format!("revision is not an object: {}", envelope)))?;
        let metadata = attributes.remove(REVISION_METADATA_FIELD).ok_or_else(|| {
            Error::Corruption(format!("revision is missing {}", REVISION_METADATA_FIELD))
        })?;
        let metadata: RevisionMetadata = serde_json::from_value(metadata)
            .map_err(|e| Error::Corruption(format!("invalid revision metadata: {}", e)))?;
        Ok(Self::new(attributes, metadata))
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Revision(source_type={}, idx={}, captured_at={})",
            self.metadata.source_type, self.metadata.idx, self.metadata.captured_at
        )
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
