//! Metadata builder.

use crate::document::Document;
use crate::output::{MetaEx, PublishMeta};
use time::OffsetDateTime;

/// Assemble the metadata record for `doc`.
///
/// The revision starts at 1; the publisher overwrites it once the revision
/// resolver has run.
pub fn build_meta(file_id: &str, doc: &Document, now: OffsetDateTime) -> PublishMeta {
    PublishMeta {
        file_id: file_id.to_string(),
        revision: 1,
        exported_date: now,
        meta: MetaEx {
            document: doc.meta.clone(),
            total_chapters: doc.steps.len(),
        },
    }
}
