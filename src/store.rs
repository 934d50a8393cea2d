//! Storage seams: where source documents come from and where published
//! objects go.
//!
//! ## Why traits?
//!
//! The publisher never talks to a cloud SDK directly. It holds an
//! [`ObjectStore`] and a [`SourceStore`] as `Arc<dyn …>` capabilities, so the
//! same pipeline runs against a bucket in production, a directory tree on a
//! laptop, and an in-memory map in tests (with injected failures).
//!
//! | Adapter | Trait | Use |
//! |---------|-------|-----|
//! | [`MemoryObjectStore`] | `ObjectStore` | tests, throwaway previews |
//! | [`FsObjectStore`]     | `ObjectStore` | local publishing, static hosting |
//! | [`MemorySource`]      | `SourceStore` | tests |
//! | [`DirectorySource`]   | `SourceStore` | exported files on disk |
//! | [`HttpSource`]        | `SourceStore` | document-store export endpoints |

use crate::error::{StoreError, StoreErrorKind};
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

/// Read and write published objects by slash-separated path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object. A missing object is [`StoreErrorKind::NotFound`].
    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Create or replace an object, returning the number of bytes written.
    async fn write(&self, path: &str, data: &[u8], content_type: &str) -> Result<u64, StoreError>;
}

/// Export a source document by file id.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn export(&self, file_id: &str, mime_type: &str) -> Result<Vec<u8>, StoreError>;
}

// ── In-memory ─────────────────────────────────────────────────────────────

/// A stored object and the content type it was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// In-memory object store.
///
/// Writes whose path contains one of the configured failure patterns fail
/// with [`StoreErrorKind::Unavailable`]; reads of paths matching a read
/// failure pattern fail with [`StoreErrorKind::PermissionDenied`].
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    failing_writes: Vec<String>,
    failing_reads: Vec<String>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an object.
    pub fn with_object(self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let path = path.into();
        let content_type = crate::output::content_type_for(&path).to_string();
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                path,
                StoredObject {
                    data: data.into(),
                    content_type,
                },
            );
        self
    }

    /// Fail every write whose path contains `pattern`.
    pub fn with_failing_write(mut self, pattern: impl Into<String>) -> Self {
        self.failing_writes.push(pattern.into());
        self
    }

    /// Fail every read whose path contains `pattern`.
    pub fn with_failing_read(mut self, pattern: impl Into<String>) -> Self {
        self.failing_reads.push(pattern.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        if self.failing_reads.iter().any(|p| path.contains(p.as_str())) {
            return Err(StoreError::new(
                StoreErrorKind::PermissionDenied,
                path,
                "injected read failure",
            ));
        }
        self.get(path)
            .map(|o| o.data)
            .ok_or_else(|| StoreError::not_found(path))
    }

    async fn write(&self, path: &str, data: &[u8], content_type: &str) -> Result<u64, StoreError> {
        if self.failing_writes.iter().any(|p| path.contains(p.as_str())) {
            return Err(StoreError::new(
                StoreErrorKind::Unavailable,
                path,
                "injected write failure",
            ));
        }
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                path.to_string(),
                StoredObject {
                    data: data.to_vec(),
                    content_type: content_type.to_string(),
                },
            );
        Ok(data.len() as u64)
    }
}

/// In-memory source documents keyed by file id.
#[derive(Debug, Default)]
pub struct MemorySource {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, file_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.insert(file_id, body);
        self
    }

    /// Replace a document, e.g. to simulate an edit between publishes.
    pub fn insert(&self, file_id: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_id.into(), body.into());
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn export(&self, file_id: &str, _mime_type: &str) -> Result<Vec<u8>, StoreError> {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(file_id))
    }
}

// ── File system ───────────────────────────────────────────────────────────

/// Object store rooted at a local directory.
///
/// Object paths map to files below the root. Writes go to a uniquely named
/// temp file in the target directory and are renamed into place, so readers
/// never observe a half-written object even when two publishes write the
/// same `latest` path.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let mut full = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(StoreError::new(
                    StoreErrorKind::Other,
                    path,
                    "path escapes store root",
                ));
            }
            full.push(segment);
        }
        Ok(full)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| StoreError::from_io(path, &e))
    }

    async fn write(&self, path: &str, data: &[u8], _content_type: &str) -> Result<u64, StoreError> {
        let full = self.resolve(path)?;
        let parent = full
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StoreError::from_io(path, &e))?;

        let data = data.to_vec();
        let len = data.len() as u64;
        let owned_path = path.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut tmp = tempfile::Builder::new()
                .prefix(".tmp-")
                .tempfile_in(&parent)
                .map_err(|e| StoreError::from_io(&owned_path, &e))?;
            tmp.write_all(&data)
                .map_err(|e| StoreError::from_io(&owned_path, &e))?;
            tmp.persist(&full)
                .map_err(|e| StoreError::from_io(&owned_path, &e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::new(StoreErrorKind::Other, path, e.to_string()))??;

        debug!("Wrote {} ({} bytes)", path, len);
        Ok(len)
    }
}

/// Source documents exported to `<root>/<fileId>.md`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extension: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "md".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

#[async_trait]
impl SourceStore for DirectorySource {
    async fn export(&self, file_id: &str, _mime_type: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join(format!("{file_id}.{}", self.extension));
        debug!("Reading source document: {}", path.display());
        tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::from_io(path.display().to_string(), &e))
    }
}

// ── HTTP ──────────────────────────────────────────────────────────────────

/// Source documents exported over HTTP.
///
/// The URL template may contain a `{file_id}` placeholder and a query value
/// of `{mime_type}`, e.g.
/// `https://www.googleapis.com/drive/v3/files/{file_id}/export?mimeType={mime_type}`.
/// The bearer token, when set, is sent as an `Authorization` header; how it
/// was obtained is the caller's concern.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url_template: String,
    bearer_token: Option<String>,
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("url_template", &self.url_template)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpSource {
    pub fn new(
        url_template: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, StoreError> {
        let url_template = url_template.into();
        Url::parse(&url_template.replace(FILE_ID_PLACEHOLDER, "x")).map_err(|e| {
            StoreError::new(
                StoreErrorKind::Other,
                &url_template,
                format!("invalid URL template: {e}"),
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::new(StoreErrorKind::Other, &url_template, e.to_string()))?;
        Ok(Self {
            client,
            url_template,
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Expand the URL template for one document.
    ///
    /// File ids are validated before export, so they go into the template
    /// text as-is. The MIME type is form-encoded with the rest of the query.
    pub fn url_for(&self, file_id: &str, mime_type: &str) -> Result<Url, StoreError> {
        let expanded = self.url_template.replace(FILE_ID_PLACEHOLDER, file_id);
        let mut url = Url::parse(&expanded)
            .map_err(|e| StoreError::new(StoreErrorKind::Other, &expanded, e.to_string()))?;
        if url.query().is_some() {
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(key, value)| {
                    let value = if value == MIME_TYPE_PLACEHOLDER {
                        mime_type.to_string()
                    } else {
                        value.into_owned()
                    };
                    (key.into_owned(), value)
                })
                .collect();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        Ok(url)
    }
}

#[async_trait]
impl SourceStore for HttpSource {
    async fn export(&self, file_id: &str, mime_type: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.url_for(file_id, mime_type)?;
        info!("Exporting source document {} from {}", file_id, url);

        let mut request = self.client.get(url.clone());
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() || e.is_connect() {
                StoreErrorKind::Unavailable
            } else {
                StoreErrorKind::Other
            };
            StoreError::new(kind, url.as_str(), e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let kind = match status.as_u16() {
                404 => StoreErrorKind::NotFound,
                401 | 403 => StoreErrorKind::PermissionDenied,
                s if s >= 500 => StoreErrorKind::Unavailable,
                _ => StoreErrorKind::Other,
            };
            return Err(StoreError::new(kind, url.as_str(), format!("HTTP {status}")));
        }

        let bytes = response.bytes().await.map_err(|e| {
            StoreError::new(StoreErrorKind::Unavailable, url.as_str(), e.to_string())
        })?;
        Ok(bytes.to_vec())
    }
}

const FILE_ID_PLACEHOLDER: &str = "{file_id}";
const MIME_TYPE_PLACEHOLDER: &str = "{mime_type}";

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_and_reports_missing() {
        let store = MemoryObjectStore::new();
        let n = store.write("a/b.json", b"{}", "application/json").await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.read("a/b.json").await.unwrap(), b"{}");
        assert_eq!(store.get("a/b.json").unwrap().content_type, "application/json");

        let err = store.read("a/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn memory_store_injected_failures() {
        let store = MemoryObjectStore::new()
            .with_failing_write("/latest/")
            .with_failing_read("meta.json");
        assert!(store.write("x/latest/index.html", b"x", "text/html").await.is_err());
        assert!(store.write("x/1/index.html", b"x", "text/html").await.is_ok());
        let err = store.read("x/latest/meta.json").await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::PermissionDenied);
        assert_eq!(store.paths(), vec!["x/1/index.html".to_string()]);
    }

    #[tokio::test]
    async fn fs_store_writes_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .write("files-dev/doc/1/img/a.png", b"png!", "image/png")
            .await
            .unwrap();
        let bytes = store.read("files-dev/doc/1/img/a.png").await.unwrap();
        assert_eq!(bytes, b"png!");
        assert!(dir.path().join("files-dev/doc/1/img/a.png").exists());

        store
            .write("files-dev/doc/1/img/a.png", b"png2", "image/png")
            .await
            .unwrap();
        assert_eq!(store.read("files-dev/doc/1/img/a.png").await.unwrap(), b"png2");
    }

    #[tokio::test]
    async fn fs_store_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.read("nope/latest/meta.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn fs_store_rejects_parent_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.write("../escape", b"x", "text/plain").await.is_err());
    }

    #[tokio::test]
    async fn directory_source_reads_by_file_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.md"), "# T\n").unwrap();
        let source = DirectorySource::new(dir.path());
        assert_eq!(source.export("abc", "text/markdown").await.unwrap(), b"# T\n");
        assert!(source
            .export("missing", "text/markdown")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn http_source_expands_template() {
        let source = HttpSource::new(
            "https://docs.example/files/{file_id}/export?mimeType={mime_type}",
            5,
        )
        .unwrap();
        assert_eq!(
            source.url_for("1xYz", "text/markdown").unwrap().as_str(),
            "https://docs.example/files/1xYz/export?mimeType=text%2Fmarkdown"
        );
    }

    #[test]
    fn http_source_keeps_other_query_values() {
        let source = HttpSource::new(
            "https://docs.example/export?id={file_id}&mimeType={mime_type}&fields=a,b",
            5,
        )
        .unwrap();
        let url = source
            .url_for("doc_1", "text/plain; charset=utf-8")
            .unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            [
                ("id".to_string(), "doc_1".to_string()),
                ("mimeType".to_string(), "text/plain; charset=utf-8".to_string()),
                ("fields".to_string(), "a,b".to_string()),
            ]
        );
    }

    #[test]
    fn http_source_rejects_unparseable_template() {
        assert!(HttpSource::new("not a url/{file_id}", 5).is_err());
    }

    #[test]
    fn http_source_debug_redacts_token() {
        let source = HttpSource::new("https://x/{file_id}", 5)
            .unwrap()
            .with_bearer_token("secret");
        let dbg = format!("{source:?}");
        assert!(!dbg.contains("secret"));
    }
}
