//! Output types produced by the render and publish operations.

use crate::document::DocumentMeta;
use crate::error::{PublishError, WriteFailure};
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One extracted image, content-addressed by checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    /// The reference as it appeared in the source document.
    pub source_url: String,
    /// `<crc64 hex><extension>`, e.g. `995dc9bbdf1939fa.png`.
    pub filename: String,
    /// Sniffed extension including the dot.
    pub extension: String,
    pub content: Vec<u8>,
}

impl ImageBuffer {
    /// Path relative to a revision root, e.g. `img/995dc9bbdf1939fa.png`.
    pub fn path(&self, image_dir: &str) -> String {
        format!("{image_dir}/{}", self.filename)
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.filename)
    }
}

/// MIME type for a stored object, by extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "html" => "text/html; charset=utf-8",
        "json" => "application/json",
        "png" => "image/png",
        "jpeg" | "jpg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// The persisted metadata record, written as `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMeta {
    pub file_id: String,
    pub revision: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub exported_date: OffsetDateTime,
    pub meta: MetaEx,
}

/// Document metadata plus fields derived at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaEx {
    #[serde(flatten)]
    pub document: DocumentMeta,
    pub total_chapters: usize,
}

/// A rendered codelab, ready to preview or publish.
#[derive(Debug, Clone)]
pub struct RenderedArtifact {
    /// Page HTML. Image references point at `<image_dir>/<filename>`.
    pub html: String,
    /// Unique images in document order.
    pub images: Vec<ImageBuffer>,
    pub meta: PublishMeta,
}

impl RenderedArtifact {
    /// The page with every extracted image inlined as a base64 data URI.
    ///
    /// Only quoted attribute values are replaced, so prose that happens to
    /// mention an image path is left alone.
    pub fn html_with_inline_images(&self, image_dir: &str) -> String {
        let mut html = self.html.clone();
        for image in &self.images {
            let reference = format!("\"{}\"", image.path(image_dir));
            let media = image.extension.trim_start_matches('.');
            let encoded = base64::engine::general_purpose::STANDARD.encode(&image.content);
            let data_uri = format!("\"data:image/{media};base64,{encoded}\"");
            html = html.replace(&reference, &data_uri);
        }
        html
    }
}

/// What the revision resolver found before computing the next revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RevisionBasis {
    /// Nothing had been published for this file id.
    FirstPublish,
    /// The `latest` metadata named this revision.
    Previous { revision: u32 },
    /// The `latest` metadata exists but could not be decoded.
    ///
    /// The revision restarts at 1 and will overwrite revision 1's objects.
    CorruptMetadata { detail: String },
}

/// Summary of a publish whose revision was decided.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub meta: PublishMeta,
    /// Every object path that was written successfully.
    pub written: Vec<String>,
    pub revision_basis: RevisionBasis,
}

/// Result of a publish that got as far as writing.
///
/// Fatal failures (nothing written) are the `Err` arm of
/// [`crate::Publisher::publish`]; this type distinguishes a clean publish
/// from one where some object writes failed.
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Complete(PublishReport),
    Partial {
        report: PublishReport,
        failures: Vec<WriteFailure>,
    },
}

impl PublishOutcome {
    pub fn report(&self) -> &PublishReport {
        match self {
            PublishOutcome::Complete(report) => report,
            PublishOutcome::Partial { report, .. } => report,
        }
    }

    pub fn revision(&self) -> u32 {
        self.report().meta.revision
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, PublishOutcome::Complete(_))
    }

    pub fn failures(&self) -> &[WriteFailure] {
        match self {
            PublishOutcome::Complete(_) => &[],
            PublishOutcome::Partial { failures, .. } => failures,
        }
    }

    /// Treat any write failure as an error.
    pub fn into_result(self) -> Result<PublishReport, PublishError> {
        match self {
            PublishOutcome::Complete(report) => Ok(report),
            PublishOutcome::Partial { report, failures } => Err(PublishError::PartialWrite {
                revision: report.meta.revision,
                failed: failures.len(),
                total: report.written.len() + failures.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn meta() -> PublishMeta {
        PublishMeta {
            file_id: "doc1".into(),
            revision: 3,
            exported_date: datetime!(2024-05-01 12:00:00 UTC),
            meta: MetaEx {
                document: DocumentMeta {
                    id: "my-lab".into(),
                    title: "My Lab".into(),
                    ..Default::default()
                },
                total_chapters: 2,
            },
        }
    }

    #[test]
    fn meta_json_shape() {
        let json = serde_json::to_value(meta()).unwrap();
        assert_eq!(json["fileId"], "doc1");
        assert_eq!(json["revision"], 3);
        assert_eq!(json["exportedDate"], "2024-05-01T12:00:00Z");
        assert_eq!(json["meta"]["title"], "My Lab");
        assert_eq!(json["meta"]["totalChapters"], 2);
    }

    #[test]
    fn meta_json_decodes_back() {
        let bytes = serde_json::to_vec(&meta()).unwrap();
        let decoded: PublishMeta = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, meta());
    }

    #[test]
    fn inline_images_use_sniffed_media_type() {
        let artifact = RenderedArtifact {
            html: r#"<img src="img/abc.png"><p>img/abc.png</p>"#.into(),
            images: vec![ImageBuffer {
                source_url: "https://x/y".into(),
                filename: "abc.png".into(),
                extension: ".png".into(),
                content: vec![1, 2, 3],
            }],
            meta: meta(),
        };
        let html = artifact.html_with_inline_images("img");
        assert_eq!(
            html,
            r#"<img src="data:image/png;base64,AQID"><p>img/abc.png</p>"#
        );
    }

    #[test]
    fn into_result_counts_failures() {
        let report = PublishReport {
            meta: meta(),
            written: vec!["a".into(), "b".into(), "c".into()],
            revision_basis: RevisionBasis::Previous { revision: 2 },
        };
        let outcome = PublishOutcome::Partial {
            report,
            failures: vec![WriteFailure {
                path: "d".into(),
                error: "denied".into(),
            }],
        };
        assert!(!outcome.is_complete());
        assert_eq!(outcome.revision(), 3);
        match outcome.into_result() {
            Err(PublishError::PartialWrite {
                revision,
                failed,
                total,
            }) => {
                assert_eq!((revision, failed, total), (3, 1, 4));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("meta.json"), "application/json");
        assert_eq!(content_type_for("ab12.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("ab12.gif"), "image/gif");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
