//! Type registry: type descriptors, relations and ignore-lists.

use crate::document::Document;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;

/// How a relation's data is held by the owning document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Child documents stored inline.
    Embedded,
    /// Only the related ids are stored.
    Reference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    One,
    Many,
}

/// A declared relation on a type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: String,
    pub multiplicity: Multiplicity,
    /// Persisted field for reference relations (e.g. `pet_ids`).
    /// Embedded relations are stored under the relation name.
    #[serde(default)]
    pub key: Option<String>,
}

impl Relation {
    pub fn embeds_one(target: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Embedded,
            target: target.into(),
            multiplicity: Multiplicity::One,
            key: None,
        }
    }

    pub fn embeds_many(target: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Embedded,
            target: target.into(),
            multiplicity: Multiplicity::Many,
            key: None,
        }
    }

    pub fn references_one(target: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Reference,
            target: target.into(),
            multiplicity: Multiplicity::One,
            key: Some(key.into()),
        }
    }

    pub fn references_many(target: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Reference,
            target: target.into(),
            multiplicity: Multiplicity::Many,
            key: Some(key.into()),
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.kind == RelationKind::Embedded
    }

    /// Name of the persisted field holding this relation.
    pub fn field_name<'a>(&'a self, relation_name: &'a str) -> &'a str {
        match (&self.kind, &self.key) {
            (RelationKind::Reference, Some(key)) => key,
            _ => relation_name,
        }
    }
}

/// Declaration of one document type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,

    /// Supertype for discriminated hierarchies.
    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub relations: BTreeMap<String, Relation>,

    /// Fields left out of revision capture.
    #[serde(default)]
    pub ignored: BTreeSet<String>,

    /// Whether instances carry `updated_at`.
    #[serde(default)]
    pub timestamps: bool,

    /// Whether instances carry revision history.
    #[serde(default)]
    pub revisable: bool,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            relations: BTreeMap::new(),
            ignored: BTreeSet::new(),
            timestamps: false,
            revisable: false,
        }
    }

    /// Enable revision history. Revisable types always keep timestamps.
    pub fn revisable(mut self) -> Self {
        self.revisable = true;
        self.timestamps = true;
        self
    }

    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    pub fn embeds_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_relation(name, Relation::embeds_one(target))
    }

    pub fn embeds_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_relation(name, Relation::embeds_many(target))
    }

    pub fn references_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.with_relation(name, Relation::references_one(target, key))
    }

    pub fn references_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.with_relation(name, Relation::references_many(target, key))
    }

    pub fn ignore(mut self, field: impl Into<String>) -> Self {
        self.ignored.insert(field.into());
        self
    }
}

/// A type with everything inherited from its ancestors folded in.
#[derive(Clone, Debug)]
pub struct TypeInfo {
    pub name: String,
    pub relations: BTreeMap<String, Relation>,
    pub ignored: BTreeSet<String>,
    pub timestamps: bool,
    pub revisable: bool,
    /// Whether the type has a parent or subtypes, i.e. whether `_type` is persisted.
    pub discriminated: bool,
}

#[derive(Deserialize)]
struct RegistryFile {
    types: Vec<TypeDescriptor>,
}

/// Process-wide mapping from type names to descriptors.
///
/// Ignore-list edits made through [`ignore_fields`](Self::ignore_fields) and
/// [`unignore_fields`](Self::unignore_fields) apply to every instance of the type.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load descriptors from a JSON document of the form `{"types": [...]}`.
    ///
    /// Parents must appear before their subtypes.
    pub fn from_json(reader: impl Read) -> Result<Self> {
        let file: RegistryFile =
            serde_json::from_reader(reader).map_err(|e| Error::Config(e.to_string()))?;
        let registry = Self::new();
        for descriptor in file.types {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Register a type. The parent, if any, must already be registered.
    pub fn register(&self, descriptor: TypeDescriptor) -> Result<()> {
        let mut types = self.types.write();
        if types.contains_key(&descriptor.name) {
            return Err(Error::Config(format!(
                "type already registered: {}",
                descriptor.name
            )));
        }
        if let Some(parent) = &descriptor.parent {
            if !types.contains_key(parent) {
                return Err(Error::Config(format!(
                    "parent {} of {} is not registered",
                    parent, descriptor.name
                )));
            }
        }
        types.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// Resolve a type together with everything it inherits.
    pub fn resolve(&self, name: &str) -> Result<TypeInfo> {
        let types = self.types.read();
        let mut chain = Vec::new();
        let mut current = Some(name);
        while let Some(n) = current {
            let descriptor = types
                .get(n)
                .ok_or_else(|| Error::TypeResolution(format!("unknown type: {}", n)))?;
            chain.push(descriptor);
            current = descriptor.parent.as_deref();
        }

        let mut info = TypeInfo {
            name: name.to_string(),
            relations: BTreeMap::new(),
            ignored: BTreeSet::new(),
            timestamps: false,
            revisable: false,
            discriminated: chain.len() > 1 || types.values().any(|t| t.parent.as_deref() == Some(name)),
        };

        // Root first so subtypes override inherited relations
        for descriptor in chain.iter().rev() {
            info.relations.extend(
                descriptor
                    .relations
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            info.ignored.extend(descriptor.ignored.iter().cloned());
            info.timestamps |= descriptor.timestamps;
            info.revisable |= descriptor.revisable;
        }
        if info.revisable {
            info.timestamps = true;
        }

        Ok(info)
    }

    /// Whether `candidate` is `base` or descends from it.
    pub fn is_kind_of(&self, candidate: &str, base: &str) -> bool {
        let types = self.types.read();
        let mut current = Some(candidate);
        while let Some(n) = current {
            if n == base {
                return true;
            }
            current = types.get(n).and_then(|t| t.parent.as_deref());
        }
        false
    }

    /// Exclude fields from revision capture for all instances of a type.
    pub fn ignore_fields<I, S>(&self, type_name: &str, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut types = self.types.write();
        let descriptor = types
            .get_mut(type_name)
            .ok_or_else(|| Error::TypeResolution(format!("unknown type: {}", type_name)))?;
        descriptor.ignored.extend(fields.into_iter().map(Into::into));
        Ok(())
    }

    /// Undo [`ignore_fields`](Self::ignore_fields).
    pub fn unignore_fields<I, S>(&self, type_name: &str, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut types = self.types.write();
        let descriptor = types
            .get_mut(type_name)
            .ok_or_else(|| Error::TypeResolution(format!("unknown type: {}", type_name)))?;
        for field in fields {
            descriptor.ignored.remove(&field.into());
        }
        Ok(())
    }

    /// Construct a blank instance of a type.
    pub fn instantiate(&self, type_name: &str) -> Result<Document> {
        let info = self.resolve(type_name)?;
        Ok(Document::blank(&info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry
            .register(
                TypeDescriptor::new("Person")
                    .revisable()
                    .embeds_many("addresses", "Address")
                    .references_many("pets", "Pet", "pet_ids")
                    .ignore("login_count"),
            )
            .unwrap();
        registry.register(TypeDescriptor::new("Address")).unwrap();
        registry
            .register(TypeDescriptor::new("Employee").with_parent("Person").ignore("badge"))
            .unwrap();
        registry
    }

    #[test]
    fn test_resolve_inherits_from_parent() {
        let registry = registry();
        let info = registry.resolve("Employee").unwrap();
        assert!(info.revisable);
        assert!(info.timestamps);
        assert!(info.discriminated);
        assert!(info.relations.contains_key("addresses"));
        assert!(info.ignored.contains("login_count"));
        assert!(info.ignored.contains("badge"));

        let person = registry.resolve("Person").unwrap();
        assert!(person.discriminated);
        assert!(!person.ignored.contains("badge"));

        let address = registry.resolve("Address").unwrap();
        assert!(!address.discriminated);
        assert!(!address.timestamps);
    }

    #[test]
    fn test_unknown_type() {
        let registry = registry();
        assert!(matches!(
            registry.resolve("Ghost"),
            Err(Error::TypeResolution(_))
        ));
    }

    #[test]
    fn test_register_rejects_duplicates_and_missing_parent() {
        let registry = registry();
        assert!(matches!(
            registry.register(TypeDescriptor::new("Person")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            registry.register(TypeDescriptor::new("Orphan").with_parent("Nobody")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_ignore_and_unignore() {
        let registry = registry();
        registry.ignore_fields("Person", ["nickname", "mood"]).unwrap();
        let info = registry.resolve("Person").unwrap();
        assert!(info.ignored.contains("nickname"));
        assert!(info.ignored.contains("mood"));

        registry.unignore_fields("Person", ["mood"]).unwrap();
        let info = registry.resolve("Person").unwrap();
        assert!(info.ignored.contains("nickname"));
        assert!(!info.ignored.contains("mood"));

        // Subtypes see the parent's edits
        assert!(registry.resolve("Employee").unwrap().ignored.contains("nickname"));
    }

    #[test]
    fn test_is_kind_of() {
        let registry = registry();
        assert!(registry.is_kind_of("Employee", "Person"));
        assert!(registry.is_kind_of("Person", "Person"));
        assert!(!registry.is_kind_of("Person", "Employee"));
        assert!(!registry.is_kind_of("Address", "Person"));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "types": [
                {
                    "name": "Person",
                    "revisable": true,
                    "timestamps": true,
                    "relations": {
                        "addresses": {"kind": "embedded", "target": "Address", "multiplicity": "many"},
                        "pets": {"kind": "reference", "target": "Pet", "multiplicity": "many", "key": "pet_ids"}
                    },
                    "ignored": ["secret"]
                },
                {"name": "Address"}
            ]
        }"#;
        let registry = TypeRegistry::from_json(json.as_bytes()).unwrap();
        let info = registry.resolve("Person").unwrap();
        assert!(info.revisable);
        assert_eq!(info.relations.len(), 2);
        assert!(info.ignored.contains("secret"));
        assert!(registry.contains("Address"));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            TypeRegistry::from_json("{not json".as_bytes()),
            Err(Error::Config(_))
        ));
    }
}
