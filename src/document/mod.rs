//! Documents: live instances, historical reifications and their persisted form.

mod model;
mod reconstruct;

pub use model::{
    Document, Embedded, ID_FIELD, REVISIONS_FIELD, REVISION_IDX_FIELD, REVISION_METADATA_FIELD,
    TYPE_FIELD, UPDATED_AT_FIELD,
};
pub use reconstruct::reconstruct;
