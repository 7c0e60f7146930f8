//! Saving, loading and revising documents against a store.

use crate::document::{reconstruct, Document, UPDATED_AT_FIELD};
use crate::error::{Error, Result};
use crate::history::{attributes_changed, capturable_attributes, Revision, RevisionMetadata};
use crate::schema::{Multiplicity, Relation, TypeRegistry};
use crate::store::DocumentStore;
use crate::types::{Clock, DocumentId, SystemClock};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Document persistence and revision lifecycle over a [`DocumentStore`].
///
/// Each operation is synchronous. Concurrent revisions of the same document
/// are not coordinated; callers serialize writes to a document.
pub struct Repository<S> {
    registry: Arc<TypeRegistry>,
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> Repository<S> {
    /// Repository using the system clock.
    pub fn new(registry: Arc<TypeRegistry>, store: S) -> Self {
        Self::with_clock(registry, store, Arc::new(SystemClock))
    }

    pub fn with_clock(registry: Arc<TypeRegistry>, store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            store,
            clock,
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// A new, unsaved document of `type_name`.
    pub fn build(&self, type_name: &str) -> Result<Document> {
        self.registry.instantiate(type_name)
    }

    /// Build a document with the given fields and save it.
    pub fn create<I, K, V>(&self, type_name: &str, fields: I) -> Result<Document>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut doc = self.build(type_name)?;
        for (field, value) in fields {
            doc.set(field, value)?;
        }
        self.save(&mut doc)?;
        Ok(doc)
    }

    /// Persist `doc`, stamping `updated_at` for timestamped types.
    ///
    /// On failure the document is left as it was.
    pub fn save(&self, doc: &mut Document) -> Result<()> {
        if doc.is_historical() {
            return Err(Error::HistoricalDocument);
        }

        let mut record = doc.to_record();
        let stamped = if doc.flags.timestamps {
            let now = self.clock.now();
            record.insert(UPDATED_AT_FIELD.to_string(), Value::from(now.as_micros()));
            Some(now)
        } else {
            None
        };

        self.store.put(doc.id(), &record)?;
        if stamped.is_some() {
            doc.updated_at = stamped;
        }
        Ok(())
    }

    /// Replace `doc` with its persisted state.
    pub fn reload(&self, doc: &mut Document) -> Result<()> {
        if doc.is_historical() {
            return Err(Error::HistoricalDocument);
        }
        let record = self
            .store
            .get(doc.id())?
            .ok_or(Error::DocumentNotFound(doc.id()))?;
        let fresh = reconstruct(&self.registry, doc.type_name(), &record)?;
        *doc = fresh;
        Ok(())
    }

    /// Load a document of `type_name` (or one of its subtypes) by id.
    pub fn find(&self, type_name: &str, id: DocumentId) -> Result<Option<Document>> {
        match self.store.get(id)? {
            Some(record) => reconstruct(&self.registry, type_name, &record).map(Some),
            None => Ok(None),
        }
    }

    /// Remove `doc` from the store; returns whether it was stored.
    pub fn delete(&self, doc: &Document) -> Result<bool> {
        if doc.is_historical() {
            return Err(Error::HistoricalDocument);
        }
        Ok(self.store.remove(doc.id())?)
    }

    /// Record `target`'s id under a reference relation of `doc`.
    ///
    /// Many-relations keep each id once. The change is in memory until saved.
    pub fn link(&self, doc: &mut Document, relation: &str, target: &Document) -> Result<()> {
        let rel = self.reference(doc, relation)?;
        if !self.registry.is_kind_of(target.type_name(), &rel.target) {
            return Err(Error::TypeResolution(format!(
                "{} cannot be linked as {}.{} (expects {})",
                target.type_name(),
                doc.type_name(),
                relation,
                rel.target
            )));
        }

        let key = rel.field_name(relation).to_string();
        let target_id = Value::String(target.id().to_hex());
        match rel.multiplicity {
            Multiplicity::One => {
                doc.fields.insert(key, target_id);
            }
            Multiplicity::Many => {
                let ids = doc
                    .fields
                    .entry(key.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                match ids {
                    Value::Array(ids) => {
                        if !ids.contains(&target_id) {
                            ids.push(target_id);
                        }
                    }
                    Value::Null => *ids = Value::Array(vec![target_id]),
                    other => {
                        return Err(Error::Corruption(format!(
                            "{} should hold a list of ids, got {}",
                            key, other
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Load the documents a reference relation of `doc` points at.
    ///
    /// Works on historical documents too. Ids whose documents no longer
    /// exist are skipped.
    pub fn related(&self, doc: &Document, relation: &str) -> Result<Vec<Document>> {
        let rel = self.reference(doc, relation)?;
        let key = rel.field_name(relation);

        let ids: Vec<DocumentId> = match doc.get(key) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| parse_reference(key, v))
                .collect::<Result<_>>()?,
            Some(single) => vec![parse_reference(key, single)?],
        };

        let mut related = Vec::with_capacity(ids.len());
        for id in ids {
            match self.find(&rel.target, id)? {
                Some(found) => related.push(found),
                None => debug!(%id, relation, "referenced document is missing"),
            }
        }
        Ok(related)
    }

    fn reference(&self, doc: &Document, relation: &str) -> Result<Relation> {
        let info = self.registry.resolve(doc.type_name())?;
        info.relations
            .get(relation)
            .filter(|rel| !rel.is_embedded())
            .cloned()
            .ok_or_else(|| Error::UnknownRelation {
                type_name: doc.type_name().to_string(),
                relation: relation.to_string(),
            })
    }

    /// Save `doc` and capture a revision if it changed since the last one.
    ///
    /// Returns whether a revision was appended. Historical documents are
    /// never revised.
    pub fn revise(&self, doc: &mut Document) -> Result<bool> {
        self.revise_with(doc, false)
    }

    /// Save `doc` and capture a revision unconditionally.
    pub fn force_revise(&self, doc: &mut Document) -> Result<bool> {
        self.revise_with(doc, true)
    }

    fn revise_with(&self, doc: &mut Document, force: bool) -> Result<bool> {
        if doc.is_historical() {
            debug!(id = %doc.id(), "not revising a historical document");
            return Ok(false);
        }
        if !doc.flags.revisable {
            return Err(Error::Config(format!(
                "{} does not keep revisions",
                doc.type_name()
            )));
        }

        // Reload so embedded and referenced values are in persisted form
        self.save(doc)?;
        self.reload(doc)?;

        if !force && !attributes_changed(&self.registry, doc)? {
            debug!(id = %doc.id(), idx = doc.revision_idx, "unchanged since last revision");
            return Ok(false);
        }

        self.append_revision(doc)?;
        Ok(true)
    }

    fn append_revision(&self, doc: &mut Document) -> Result<()> {
        let attributes = capturable_attributes(&self.registry, doc)?;
        let metadata = RevisionMetadata {
            captured_at: self.clock.now(),
            source_type: doc.type_name().to_string(),
            idx: doc.revision_idx,
        };
        doc.revisions.push(Revision::new(attributes, metadata));
        doc.revision_idx += 1;

        if let Err(e) = self.save(doc) {
            doc.revisions.pop();
            doc.revision_idx -= 1;
            warn!(id = %doc.id(), error = %e, "failed to save revision, rolled back");
            return Err(e);
        }

        debug!(id = %doc.id(), idx = doc.revision_idx - 1, "revision appended");
        Ok(())
    }
}

fn parse_reference(key: &str, value: &Value) -> Result<DocumentId> {
    value
        .as_str()
        .and_then(|s| DocumentId::from_hex(s).ok())
        .ok_or_else(|| Error::Corruption(format!("{} holds an invalid id: {}", key, value)))
}
