//! Revision resolver: read the `latest` metadata and pick the next revision.
//!
//! | `latest/meta.json` | Next revision | Basis |
//! |--------------------|---------------|-------|
//! | missing | 1 | [`RevisionBasis::FirstPublish`] |
//! | unreadable (denied, unavailable) | none | fatal [`PublishError::RevisionResolve`] |
//! | no numeric `revision` field | 1 | [`RevisionBasis::CorruptMetadata`], logged at error level |
//! | revision `N` | `N + 1` | [`RevisionBasis::Previous`] |
//!
//! Only `revision` is read. Records written by other publishers carry
//! differently shaped metadata and still count as a valid prior revision.
//!
//! The corrupt case restarts numbering rather than failing so a damaged
//! pointer cannot block publishing forever; the report carries the basis so
//! callers can alert on it.

use crate::error::PublishError;
use crate::output::RevisionBasis;
use crate::paths::{ObjectLayout, RevisionRef};
use crate::store::ObjectStore;
use serde::Deserialize;
use tracing::{debug, error};

#[derive(Deserialize)]
struct PriorRevision {
    revision: u32,
}

/// Resolve the revision the next publish of `file_id` should use.
pub async fn resolve_next_revision(
    store: &dyn ObjectStore,
    layout: &ObjectLayout,
    file_id: &str,
) -> Result<(u32, RevisionBasis), PublishError> {
    let path = layout.meta(file_id, RevisionRef::Latest);
    let bytes = match store.read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => {
            debug!("{}: no published metadata, first revision", file_id);
            return Ok((1, RevisionBasis::FirstPublish));
        }
        Err(e) => {
            return Err(PublishError::RevisionResolve {
                file_id: file_id.to_string(),
                source: e,
            })
        }
    };

    match serde_json::from_slice::<PriorRevision>(&bytes) {
        Ok(meta) => {
            let next = meta.revision.saturating_add(1);
            debug!("{}: latest is revision {}, next {}", file_id, meta.revision, next);
            Ok((
                next,
                RevisionBasis::Previous {
                    revision: meta.revision,
                },
            ))
        }
        Err(e) => {
            error!(
                file_id = %file_id,
                path = %path,
                error = %e,
                "Published metadata is corrupt; restarting at revision 1"
            );
            Ok((
                1,
                RevisionBasis::CorruptMetadata {
                    detail: e.to_string(),
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreErrorKind;
    use crate::store::MemoryObjectStore;

    fn layout() -> ObjectLayout {
        ObjectLayout::new("files-dev", "img")
    }

    fn meta_json(revision: u32) -> String {
        format!(
            r#"{{"fileId":"doc","revision":{revision},"exportedDate":"2024-05-01T12:00:00Z","meta":{{"id":"lab","title":"Lab","duration":0,"totalChapters":2}}}}"#
        )
    }

    #[tokio::test]
    async fn missing_metadata_starts_at_one() {
        let store = MemoryObjectStore::new();
        let (rev, basis) = resolve_next_revision(&store, &layout(), "doc").await.unwrap();
        assert_eq!(rev, 1);
        assert_eq!(basis, RevisionBasis::FirstPublish);
    }

    #[tokio::test]
    async fn existing_revision_is_incremented() {
        let store = MemoryObjectStore::new()
            .with_object("files-dev/doc/latest/meta.json", meta_json(5));
        let (rev, basis) = resolve_next_revision(&store, &layout(), "doc").await.unwrap();
        assert_eq!(rev, 6);
        assert_eq!(basis, RevisionBasis::Previous { revision: 5 });
    }

    #[tokio::test]
    async fn corrupt_metadata_restarts_with_basis() {
        let store = MemoryObjectStore::new()
            .with_object("files-dev/doc/latest/meta.json", "{not json");
        let (rev, basis) = resolve_next_revision(&store, &layout(), "doc").await.unwrap();
        assert_eq!(rev, 1);
        assert!(matches!(basis, RevisionBasis::CorruptMetadata { .. }));
    }

    #[tokio::test]
    async fn only_the_revision_field_is_required() {
        let store = MemoryObjectStore::new()
            .with_object("files-dev/doc/latest/meta.json", r#"{"fileId":"doc","revision":5}"#);
        let (rev, basis) = resolve_next_revision(&store, &layout(), "doc").await.unwrap();
        assert_eq!(rev, 6);
        assert_eq!(basis, RevisionBasis::Previous { revision: 5 });
    }

    #[tokio::test]
    async fn missing_or_non_numeric_revision_is_corrupt() {
        for body in [r#"{"fileId":"doc"}"#, r#"{"revision":"5"}"#, r#"{"revision":-1}"#] {
            let store =
                MemoryObjectStore::new().with_object("files-dev/doc/latest/meta.json", body);
            let (rev, basis) = resolve_next_revision(&store, &layout(), "doc").await.unwrap();
            assert_eq!(rev, 1, "{body}");
            assert!(matches!(basis, RevisionBasis::CorruptMetadata { .. }), "{body}");
        }
    }

    #[tokio::test]
    async fn unreadable_metadata_is_fatal() {
        let store = MemoryObjectStore::new().with_failing_read("latest/meta.json");
        let err = resolve_next_revision(&store, &layout(), "doc").await.unwrap_err();
        match err {
            PublishError::RevisionResolve { file_id, source } => {
                assert_eq!(file_id, "doc");
                assert_eq!(source.kind, StoreErrorKind::PermissionDenied);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
