//! Revision history: snapshot records, the change gate and lookups.

mod gate;
mod resolve;
mod revision;

pub use gate::{attributes_changed, capturable_attributes, filter_capturable};
pub use revision::{Revision, RevisionMetadata};
