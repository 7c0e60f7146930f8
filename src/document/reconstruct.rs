//! Rebuilding typed documents from persisted attribute maps.
//!
//! The same routine serves reloads from a store and reification of revisions.
//! Embedded relations are rebuilt as typed child documents at every depth,
//! with `_type` discriminators honoured; reference relations stay as the raw
//! id values they were stored as.

use super::model::{
    Document, Embedded, ID_FIELD, REVISIONS_FIELD, REVISION_IDX_FIELD, REVISION_METADATA_FIELD,
    TYPE_FIELD, UPDATED_AT_FIELD,
};
use crate::error::{Error, Result};
use crate::history::Revision;
use crate::schema::{Multiplicity, Relation, TypeRegistry};
use crate::types::{DocumentId, Timestamp};
use serde_json::{Map, Value};

/// Build a document of `type_name` (or the subtype named by `_type`) from
/// its persisted attributes.
pub fn reconstruct(
    registry: &TypeRegistry,
    type_name: &str,
    attributes: &Map<String, Value>,
) -> Result<Document> {
    let resolved = resolve_type(registry, type_name, attributes)?;
    let info = registry.resolve(resolved)?;
    let mut doc = Document::blank(&info);

    for (key, value) in attributes {
        match key.as_str() {
            ID_FIELD => doc.id = parse_id(value)?,
            TYPE_FIELD | REVISION_METADATA_FIELD => {}
            UPDATED_AT_FIELD if info.timestamps => doc.updated_at = parse_timestamp(value)?,
            REVISION_IDX_FIELD if info.revisable => {
                doc.revision_idx = value.as_u64().filter(|idx| *idx >= 1).ok_or_else(|| {
                    Error::Corruption(format!("invalid {}: {}", REVISION_IDX_FIELD, value))
                })?;
            }
            REVISIONS_FIELD if info.revisable => doc.revisions = parse_revisions(value)?,
            _ => match info.relations.get(key).filter(|r| r.is_embedded()) {
                Some(relation) => {
                    let embedded = reconstruct_embedded(registry, key, relation, value)?;
                    doc.embedded.insert(key.clone(), embedded);
                }
                None => {
                    doc.fields.insert(key.clone(), value.clone());
                }
            },
        }
    }

    Ok(doc)
}

/// Pick the concrete type: the discriminator if present, else the requested type.
fn resolve_type<'a>(
    registry: &TypeRegistry,
    type_name: &'a str,
    attributes: &'a Map<String, Value>,
) -> Result<&'a str> {
    match attributes.get(TYPE_FIELD) {
        None | Some(Value::Null) => Ok(type_name),
        Some(Value::String(discriminator)) => {
            if !registry.contains(discriminator) {
                return Err(Error::TypeResolution(format!(
                    "unknown discriminator: {}",
                    discriminator
                )));
            }
            if !registry.is_kind_of(discriminator, type_name) {
                return Err(Error::TypeResolution(format!(
                    "{} is not a subtype of {}",
                    discriminator, type_name
                )));
            }
            Ok(discriminator)
        }
        Some(other) => Err(Error::Corruption(format!(
            "{} must be a string, got {}",
            TYPE_FIELD, other
        ))),
    }
}

fn reconstruct_embedded(
    registry: &TypeRegistry,
    name: &str,
    relation: &Relation,
    value: &Value,
) -> Result<Embedded> {
    match (relation.multiplicity, value) {
        (Multiplicity::One, Value::Null) => Ok(Embedded::One(None)),
        (Multiplicity::One, Value::Object(attrs)) => {
            let child = reconstruct(registry, &relation.target, attrs)?;
            Ok(Embedded::One(Some(Box::new(child))))
        }
        (Multiplicity::Many, Value::Null) => Ok(Embedded::Many(Vec::new())),
        (Multiplicity::Many, Value::Array(items)) => {
            let children = items
                .iter()
                .map(|item| match item {
                    Value::Object(attrs) => reconstruct(registry, &relation.target, attrs),
                    other => Err(Error::Corruption(format!(
                        "embedded {} entry is not a document: {}",
                        name, other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Embedded::Many(children))
        }
        (_, other) => Err(Error::Corruption(format!(
            "embedded relation {} has unexpected value: {}",
            name, other
        ))),
    }
}

fn parse_id(value: &Value) -> Result<DocumentId> {
    value
        .as_str()
        .and_then(|s| DocumentId::from_hex(s).ok())
        .ok_or_else(|| Error::Corruption(format!("invalid {}: {}", ID_FIELD, value)))
}

fn parse_timestamp(value: &Value) -> Result<Option<Timestamp>> {
    match value {
        Value::Null => Ok(None),
        other => other
            .as_i64()
            .map(|micros| Some(Timestamp(micros)))
            .ok_or_else(|| Error::Corruption(format!("invalid {}: {}", UPDATED_AT_FIELD, other))),
    }
}

fn parse_revisions(value: &Value) -> Result<Vec<Revision>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(envelopes) => envelopes.iter().map(Revision::from_envelope).collect(),
        other => Err(Error::Corruption(format!(
            "{} must be an array, got {}",
            REVISIONS_FIELD, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeDescriptor;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry
            .register(
                TypeDescriptor::new("Person")
                    .revisable()
                    .embeds_many("addresses", "Address")
                    .references_many("pets", "Pet", "pet_ids"),
            )
            .unwrap();
        registry
            .register(TypeDescriptor::new("Address").embeds_one("geo", "Geo"))
            .unwrap();
        registry
            .register(TypeDescriptor::new("PoBox").with_parent("Address"))
            .unwrap();
        registry.register(TypeDescriptor::new("Geo")).unwrap();
        registry.register(TypeDescriptor::new("Pet")).unwrap();
        registry
    }

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_roundtrip_through_record() {
        let registry = registry();
        let mut person = registry.instantiate("Person").unwrap();
        person.set("name", "Ada").unwrap();
        let mut address = registry.instantiate("Address").unwrap();
        address.set("address", "1 Main St").unwrap();
        let mut geo = registry.instantiate("Geo").unwrap();
        geo.set("lat", 51.5).unwrap();
        address.set_embedded("geo", Some(geo)).unwrap();
        person.push_embedded("addresses", address).unwrap();

        let rebuilt = reconstruct(&registry, "Person", &person.to_record()).unwrap();
        assert_eq!(rebuilt, person);
    }

    #[test]
    fn test_nested_discriminator() {
        let registry = registry();
        let record = attrs(json!({
            "_id": DocumentId::new().to_hex(),
            "name": "Ada",
            "addresses": [
                {"_id": DocumentId::new().to_hex(), "_type": "PoBox", "address": "PO 7", "geo": null},
                {"_id": DocumentId::new().to_hex(), "_type": "Address", "address": "1 Main St",
                 "geo": {"_id": DocumentId::new().to_hex(), "lat": 1.0}}
            ],
            "pet_ids": ["aaaaaaaaaaaaaaaaaaaaaaaa"],
            "revision_idx": 3
        }));

        let doc = reconstruct(&registry, "Person", &record).unwrap();
        let addresses = doc.embedded_many("addresses");
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].type_name(), "PoBox");
        assert_eq!(addresses[1].type_name(), "Address");
        assert_eq!(
            addresses[1].embedded_one("geo").unwrap().get("lat"),
            Some(&json!(1.0))
        );
        // Reference ids stay raw
        assert_eq!(doc.get("pet_ids"), Some(&json!(["aaaaaaaaaaaaaaaaaaaaaaaa"])));
        assert!(doc.embedded("pets").is_none());
        assert_eq!(doc.revision_idx(), 3);
    }

    #[test]
    fn test_unknown_discriminator() {
        let registry = registry();
        let record = attrs(json!({"_type": "Spaceship"}));
        assert!(matches!(
            reconstruct(&registry, "Address", &record),
            Err(Error::TypeResolution(_))
        ));
    }

    #[test]
    fn test_discriminator_outside_hierarchy() {
        let registry = registry();
        let record = attrs(json!({"_type": "Pet"}));
        assert!(matches!(
            reconstruct(&registry, "Address", &record),
            Err(Error::TypeResolution(_))
        ));
    }

    #[test]
    fn test_malformed_embedded_value() {
        let registry = registry();
        let record = attrs(json!({"addresses": "not a list"}));
        assert!(matches!(
            reconstruct(&registry, "Person", &record),
            Err(Error::Corruption(_))
        ));

        let record = attrs(json!({"addresses": [1, 2]}));
        assert!(matches!(
            reconstruct(&registry, "Person", &record),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_null_embedded_values_become_empty() {
        let registry = registry();
        let record = attrs(json!({"addresses": null}));
        let doc = reconstruct(&registry, "Person", &record).unwrap();
        assert!(doc.embedded_many("addresses").is_empty());
    }

    #[test]
    fn test_invalid_revision_idx() {
        let registry = registry();
        let record = attrs(json!({"revision_idx": 0}));
        assert!(matches!(
            reconstruct(&registry, "Person", &record),
            Err(Error::Corruption(_))
        ));
    }
}
