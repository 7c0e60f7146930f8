//! Attribute capture and the change check guarding new revisions.

use crate::document::{
    Document, REVISIONS_FIELD, REVISION_IDX_FIELD, REVISION_METADATA_FIELD, UPDATED_AT_FIELD,
};
use crate::error::Result;
use crate::schema::{TypeInfo, TypeRegistry};
use serde_json::{Map, Value};

/// Drop history bookkeeping and ignored fields from a persisted record.
pub fn filter_capturable(info: &TypeInfo, mut attributes: Map<String, Value>) -> Map<String, Value> {
    attributes.retain(|key, _| {
        key != REVISIONS_FIELD
            && key != REVISION_METADATA_FIELD
            && key != UPDATED_AT_FIELD
            && !info.ignored.contains(key)
    });
    attributes
}

/// Attributes a revision of `document` would capture.
pub fn capturable_attributes(registry: &TypeRegistry, document: &Document) -> Result<Map<String, Value>> {
    let info = registry.resolve(document.type_name())?;
    Ok(filter_capturable(&info, document.to_record()))
}

/// Capturable attributes minus `revision_idx`, which moves on every revision.
fn comparable(info: &TypeInfo, attributes: Map<String, Value>) -> Map<String, Value> {
    let mut attributes = filter_capturable(info, attributes);
    attributes.remove(REVISION_IDX_FIELD);
    attributes
}

/// Whether `document` differs from its latest revision.
///
/// Always true when there is no revision yet.
pub fn attributes_changed(registry: &TypeRegistry, document: &Document) -> Result<bool> {
    let last = match document.revisions().last() {
        Some(last) => last,
        None => return Ok(true),
    };
    let info = registry.resolve(document.type_name())?;
    let previous = comparable(&info, last.attributes().clone());
    let current = comparable(&info, document.to_record());
    Ok(previous != current)
}
