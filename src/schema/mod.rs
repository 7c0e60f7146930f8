//! Type declarations consumed by reification and revision capture.

mod registry;

pub use registry::{Multiplicity, Relation, RelationKind, TypeDescriptor, TypeInfo, TypeRegistry};
