//! # Revisions
//!
//! Document-level revision history for a document store. Revising a
//! document appends a snapshot of its attributes to a history embedded in
//! the document itself; any past state can later be rebuilt as a detached,
//! read-only document.
//!
//! ## Core Concepts
//!
//! - **Documents**: typed records with scalar fields, embedded children and references by id
//! - **Revisions**: immutable snapshots with capture time, source type and index
//! - **Change gate**: a revision is only captured when the attributes changed
//! - **Resolution**: look up the document as of a timestamp or a revision index
//!
//! ## Example
//!
//! ```ignore
//! use revisions::{MemoryStore, Repository, TypeDescriptor, TypeRegistry, Timestamp};
//! use std::sync::Arc;
//!
//! let registry = TypeRegistry::new();
//! registry.register(TypeDescriptor::new("Person").revisable())?;
//! let repo = Repository::new(Arc::new(registry), MemoryStore::new());
//!
//! let mut person = repo.create("Person", [("name", "1")])?;
//! repo.revise(&mut person)?;
//! person.set("name", "2")?;
//! repo.revise(&mut person)?;
//!
//! let first = person.revisions()[0].reify(repo.registry())?;
//! assert_eq!(first.get_str("name"), Some("1"));
//! let then = person.revision_at(repo.registry(), Timestamp::from_secs(1_585_699_200))?;
//! ```

pub mod document;
pub mod error;
pub mod history;
pub mod repository;
pub mod schema;
pub mod store;
pub mod types;

// Re-exports
pub use document::{reconstruct, Document, Embedded};
pub use error::{Error, Result, StoreError, StoreResult};
pub use history::{attributes_changed, capturable_attributes, Revision, RevisionMetadata};
pub use repository::Repository;
pub use schema::{Multiplicity, Relation, RelationKind, TypeDescriptor, TypeInfo, TypeRegistry};
pub use store::{DocumentStore, FileStore, MemoryStore, StoreConfig};
pub use types::{Clock, DocumentId, ManualClock, SystemClock, Timestamp};
