//! Point-in-time and by-index lookups over a document's history.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::schema::TypeRegistry;
use crate::types::Timestamp;
use std::borrow::Cow;
use tracing::trace;

impl Document {
    /// The document as it was at `at`.
    ///
    /// Returns the live document itself when there is no history or `at` is
    /// not before the last save. Earlier times clamp to the first and last
    /// revisions; anything in between resolves to the newest revision
    /// captured at or before `at`.
    pub fn revision_at(&self, registry: &TypeRegistry, at: Timestamp) -> Result<Cow<'_, Document>> {
        let (first, last) = match (self.revisions.first(), self.revisions.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(Cow::Borrowed(self)),
        };

        match self.updated_at {
            Some(updated_at) if at < updated_at => {}
            _ => {
                trace!(id = %self.id, %at, "resolved to live document");
                return Ok(Cow::Borrowed(self));
            }
        }

        if at <= first.captured_at() {
            trace!(id = %self.id, %at, "clamped to earliest revision");
            return first.reify(registry).map(Cow::Owned);
        }
        if at >= last.captured_at() {
            trace!(id = %self.id, %at, "clamped to latest revision");
            return last.reify(registry).map(Cow::Owned);
        }

        let mut successor: Option<Timestamp> = None;
        for revision in self.revisions.iter().rev() {
            let captured_at = revision.captured_at();
            if let Some(next) = successor {
                if captured_at > next {
                    return Err(Error::InvariantViolation(format!(
                        "revision {} of {} captured at {} after its successor at {}",
                        revision.idx(),
                        self.id,
                        captured_at,
                        next
                    )));
                }
            }
            if captured_at <= at {
                trace!(id = %self.id, %at, idx = revision.idx(), "resolved by scan");
                return revision.reify(registry).map(Cow::Owned);
            }
            successor = Some(captured_at);
        }

        Err(Error::InvariantViolation(format!(
            "no revision of {} captured at or before {}",
            self.id, at
        )))
    }

    /// The document at revision index `idx`.
    ///
    /// The live document answers for its own `revision_idx`. Returns `None`
    /// when no revision carries the index.
    pub fn revision_with_idx(
        &self,
        registry: &TypeRegistry,
        idx: u64,
    ) -> Result<Option<Cow<'_, Document>>> {
        if self.revision_idx == idx {
            return Ok(Some(Cow::Borrowed(self)));
        }
        self.revisions
            .iter()
            .find(|revision| revision.idx() == idx)
            .map(|revision| revision.reify(registry).map(Cow::Owned))
            .transpose()
    }
}
