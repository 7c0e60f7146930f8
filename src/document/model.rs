//! In-memory document representation and its persisted layout.

use crate::error::{Error, Result};
use crate::history::Revision;
use crate::schema::{Multiplicity, RelationKind, TypeInfo};
use crate::types::{DocumentId, Timestamp};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const ID_FIELD: &str = "_id";
/// Discriminator naming the concrete type within a hierarchy.
pub const TYPE_FIELD: &str = "_type";
pub const UPDATED_AT_FIELD: &str = "updated_at";
pub const REVISION_IDX_FIELD: &str = "revision_idx";
pub const REVISION_METADATA_FIELD: &str = "_revision_metadata";
pub const REVISIONS_FIELD: &str = "_revisions";

const RESERVED_FIELDS: [&str; 6] = [
    ID_FIELD,
    TYPE_FIELD,
    UPDATED_AT_FIELD,
    REVISION_IDX_FIELD,
    REVISION_METADATA_FIELD,
    REVISIONS_FIELD,
];

/// Per-type switches copied onto each instance so it can serialize itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct TypeFlags {
    pub discriminated: bool,
    pub timestamps: bool,
    pub revisable: bool,
}

/// Value of an embedded relation.
#[derive(Clone, Debug, PartialEq)]
pub enum Embedded {
    One(Option<Box<Document>>),
    Many(Vec<Document>),
}

impl Embedded {
    fn to_value(&self) -> Value {
        match self {
            Embedded::One(Some(doc)) => Value::Object(doc.to_record()),
            Embedded::One(None) => Value::Null,
            Embedded::Many(docs) => {
                Value::Array(docs.iter().map(|d| Value::Object(d.to_record())).collect())
            }
        }
    }
}

/// A document instance, either live or reified from a revision.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub(crate) id: DocumentId,
    pub(crate) type_name: String,
    pub(crate) flags: TypeFlags,
    /// Scalar fields and reference-by-id fields.
    pub(crate) fields: Map<String, Value>,
    pub(crate) embedded: BTreeMap<String, Embedded>,
    pub(crate) updated_at: Option<Timestamp>,
    pub(crate) revision_idx: u64,
    pub(crate) revisions: Vec<Revision>,
    /// Set only on reified instances; never persisted.
    pub(crate) revision: Option<Revision>,
}

impl Document {
    /// Blank instance with every declared relation at its empty value.
    pub(crate) fn blank(info: &TypeInfo) -> Self {
        let mut fields = Map::new();
        let mut embedded = BTreeMap::new();

        for (name, relation) in &info.relations {
            match (relation.kind, relation.multiplicity) {
                (RelationKind::Embedded, Multiplicity::One) => {
                    embedded.insert(name.clone(), Embedded::One(None));
                }
                (RelationKind::Embedded, Multiplicity::Many) => {
                    embedded.insert(name.clone(), Embedded::Many(Vec::new()));
                }
                (RelationKind::Reference, Multiplicity::One) => {
                    fields.insert(relation.field_name(name).to_string(), Value::Null);
                }
                (RelationKind::Reference, Multiplicity::Many) => {
                    fields.insert(relation.field_name(name).to_string(), Value::Array(Vec::new()));
                }
            }
        }

        Self {
            id: DocumentId::new(),
            type_name: info.name.clone(),
            flags: TypeFlags {
                discriminated: info.discriminated,
                timestamps: info.timestamps,
                revisable: info.revisable,
            },
            fields,
            embedded,
            updated_at: None,
            revision_idx: 1,
            revisions: Vec::new(),
            revision: None,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    /// Index the next revision will be captured under.
    pub fn revision_idx(&self) -> u64 {
        self.revision_idx
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of a field, if it holds one.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Set a plain field. Reserved names and embedded relations are rejected.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let field = field.into();
        if RESERVED_FIELDS.contains(&field.as_str()) || self.embedded.contains_key(&field) {
            return Err(Error::ReservedField(field));
        }
        self.fields.insert(field, value.into());
        Ok(())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn embedded(&self, relation: &str) -> Option<&Embedded> {
        self.embedded.get(relation)
    }

    /// Children of an embedded-many relation (empty if not declared).
    pub fn embedded_many(&self, relation: &str) -> &[Document] {
        match self.embedded.get(relation) {
            Some(Embedded::Many(docs)) => docs,
            _ => &[],
        }
    }

    pub fn embedded_one(&self, relation: &str) -> Option<&Document> {
        match self.embedded.get(relation) {
            Some(Embedded::One(Some(doc))) => Some(doc),
            _ => None,
        }
    }

    /// Append a child to an embedded-many relation.
    pub fn push_embedded(&mut self, relation: &str, child: Document) -> Result<()> {
        match self.embedded.get_mut(relation) {
            Some(Embedded::Many(docs)) => {
                docs.push(child);
                Ok(())
            }
            _ => Err(self.unknown_relation(relation)),
        }
    }

    /// Mutable access to the children of an embedded-many relation.
    pub fn embedded_many_mut(&mut self, relation: &str) -> Result<&mut Vec<Document>> {
        match self.embedded.get_mut(relation) {
            Some(Embedded::Many(docs)) => Ok(docs),
            _ => Err(Error::UnknownRelation {
                type_name: self.type_name.clone(),
                relation: relation.to_string(),
            }),
        }
    }

    /// Replace the child of an embedded-one relation.
    pub fn set_embedded(&mut self, relation: &str, child: Option<Document>) -> Result<()> {
        match self.embedded.get_mut(relation) {
            Some(Embedded::One(slot)) => {
                *slot = child.map(Box::new);
                Ok(())
            }
            _ => Err(self.unknown_relation(relation)),
        }
    }

    fn unknown_relation(&self, relation: &str) -> Error {
        Error::UnknownRelation {
            type_name: self.type_name.clone(),
            relation: relation.to_string(),
        }
    }

    // --- Revision history ---

    /// All revisions, oldest first.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// Lazy, restartable view over the revisions, oldest first.
    pub fn lazy_revisions(&self) -> std::slice::Iter<'_, Revision> {
        self.revisions.iter()
    }

    pub fn has_revisions(&self) -> bool {
        !self.revisions.is_empty()
    }

    /// The revision this instance was reified from, if any.
    pub fn current_revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }

    pub fn is_historical(&self) -> bool {
        self.revision.is_some()
    }

    pub fn is_live(&self) -> bool {
        !self.is_historical()
    }

    // --- Persisted layout ---

    /// The document as stored: domain fields, embedded children inline and,
    /// depending on the type, `_type`, `updated_at` and the revision fields.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert(ID_FIELD.to_string(), Value::String(self.id.to_hex()));
        if self.flags.discriminated {
            record.insert(TYPE_FIELD.to_string(), Value::String(self.type_name.clone()));
        }

        for (key, value) in &self.fields {
            record.insert(key.clone(), value.clone());
        }
        for (name, value) in &self.embedded {
            record.insert(name.clone(), value.to_value());
        }

        if self.flags.timestamps {
            let updated_at = self
                .updated_at
                .map(|t| Value::from(t.as_micros()))
                .unwrap_or(Value::Null);
            record.insert(UPDATED_AT_FIELD.to_string(), updated_at);
        }

        if self.flags.revisable {
            record.insert(REVISION_IDX_FIELD.to_string(), Value::from(self.revision_idx));
            record.insert(REVISION_METADATA_FIELD.to_string(), Value::Null);
            record.insert(
                REVISIONS_FIELD.to_string(),
                Value::Array(self.revisions.iter().map(Revision::to_envelope).collect()),
            );
        }

        record
    }
}
