//! The publisher: preview, publish and read back codelabs.
//!
//! ## Why one orchestrator?
//!
//! Every operation here shares the same front half (export, parse, extract,
//! render) and differs only in what happens to the result: [`Publisher::preview`]
//! inlines the images and returns the page, [`Publisher::publish`] picks a
//! revision and writes everything twice (revision tree and `latest` tree).
//! Keeping them on one type means they can never drift apart.
//!
//! ```text
//! export ─▶ parse ─▶ extract ─▶ render ─▶ meta ─┬─▶ preview (inline images)
//!                                               │
//!                                               └─▶ lock(fileId) ─▶ resolve ─▶ write ×(4 + 2K)
//! ```
//!
//! ## Concurrency
//!
//! Publishes of the same file id are serialised by an async mutex held from
//! revision resolution until every write has been attempted, so concurrent
//! publishes in one process get consecutive revisions. Different file ids
//! proceed in parallel.

use crate::config::PublishConfig;
use crate::document::Document;
use crate::error::{PublishError, ReadError, WriteFailure};
use crate::output::{
    content_type_for, ImageBuffer, PublishMeta, PublishOutcome, PublishReport, RenderedArtifact,
};
use crate::paths::{is_valid_file_id, is_valid_media_filename, ObjectLayout, RevisionRef};
use crate::pipeline::fetch::{Fetcher, RetryingFetcher};
use crate::pipeline::media::{self, MediaOptions};
use crate::pipeline::{meta, parse, render, revision};
use crate::progress::{NoopObserver, PublishObserver, Stage};
use crate::store::{ObjectStore, SourceStore};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Runs the codelab pipeline against a source store and an object store.
pub struct Publisher {
    source: Arc<dyn SourceStore>,
    objects: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn Fetcher>,
    config: PublishConfig,
    layout: ObjectLayout,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .field("locked_files", &self.locks.len())
            .finish()
    }
}

impl Publisher {
    pub fn new(
        source: Arc<dyn SourceStore>,
        objects: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn Fetcher>,
        config: PublishConfig,
    ) -> Self {
        let layout = ObjectLayout::new(config.storage_path.clone(), config.image_dir.clone());
        Self {
            source,
            objects,
            fetcher,
            config,
            layout,
            locks: DashMap::new(),
        }
    }

    /// Build a publisher that fetches images over HTTP with the configured
    /// retry policy and timeout.
    pub fn with_http_fetcher(
        source: Arc<dyn SourceStore>,
        objects: Arc<dyn ObjectStore>,
        config: PublishConfig,
    ) -> Result<Self, PublishError> {
        let fetcher = RetryingFetcher::from_config(&config)
            .map_err(|e| PublishError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self::new(source, objects, Arc::new(fetcher), config))
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    pub fn layout(&self) -> &ObjectLayout {
        &self.layout
    }

    fn observer(&self) -> &dyn PublishObserver {
        match self.config.observer.as_deref() {
            Some(observer) => observer,
            None => &NoopObserver,
        }
    }

    // ── Front half ────────────────────────────────────────────────────────

    async fn load(&self, file_id: &str) -> Result<Document, PublishError> {
        if !is_valid_file_id(file_id) {
            return Err(PublishError::InvalidFileId {
                file_id: file_id.to_string(),
            });
        }
        let observer = self.observer();

        observer.on_stage(file_id, Stage::Export);
        let raw = self
            .source
            .export(file_id, &self.config.export_mime_type)
            .await
            .map_err(|e| PublishError::SourceExport {
                file_id: file_id.to_string(),
                source: e,
            })?;
        debug!("{}: exported {} bytes", file_id, raw.len());

        observer.on_stage(file_id, Stage::Parse);
        let doc = parse::parse(&raw)?;
        info!(
            file_id = %file_id,
            id = %doc.meta.id,
            steps = doc.steps.len(),
            "Parsed codelab '{}'",
            doc.meta.title
        );
        Ok(doc)
    }

    /// Export, parse, extract images and render `file_id`.
    ///
    /// Nothing is written. The returned metadata carries revision 1; the
    /// real revision is only decided by [`Publisher::publish`].
    pub async fn render(&self, file_id: &str) -> Result<RenderedArtifact, PublishError> {
        let mut doc = self.load(file_id).await?;
        let observer = self.observer();

        observer.on_stage(file_id, Stage::ExtractMedia);
        let images = media::extract_images(
            &mut doc,
            self.fetcher.as_ref(),
            MediaOptions {
                file_id,
                image_dir: self.layout.image_dir(),
                concurrency: self.config.fetch_concurrency,
                observer,
            },
        )
        .await?;

        observer.on_stage(file_id, Stage::Render);
        let now = self.config.clock.now();
        let html = render::render(
            &doc,
            &self.config.render,
            self.config.template.as_deref(),
            now,
        )?;
        let meta = meta::build_meta(file_id, &doc, now);

        Ok(RenderedArtifact { html, images, meta })
    }

    /// Render `file_id` with every image inlined as a data URI.
    pub async fn preview(&self, file_id: &str) -> Result<String, PublishError> {
        let artifact = self.render(file_id).await?;
        Ok(artifact.html_with_inline_images(self.layout.image_dir()))
    }

    /// Render `file_id` without fetching images; references stay remote.
    pub async fn preview_remote(&self, file_id: &str) -> Result<String, PublishError> {
        let doc = self.load(file_id).await?;
        self.observer().on_stage(file_id, Stage::Render);
        let html = render::render(
            &doc,
            &self.config.render,
            self.config.template.as_deref(),
            self.config.clock.now(),
        )?;
        Ok(html)
    }

    /// The revision the next publish of `file_id` would use.
    pub async fn resolve_next_revision(&self, file_id: &str) -> Result<u32, PublishError> {
        if !is_valid_file_id(file_id) {
            return Err(PublishError::InvalidFileId {
                file_id: file_id.to_string(),
            });
        }
        let (revision, _) =
            revision::resolve_next_revision(self.objects.as_ref(), &self.layout, file_id).await?;
        Ok(revision)
    }

    // ── Publish ───────────────────────────────────────────────────────────

    /// Render `file_id` and write it as the next revision and as `latest`.
    ///
    /// # Returns
    /// `Ok(PublishOutcome::Complete)` when every object was written,
    /// `Ok(PublishOutcome::Partial)` when some writes failed after the
    /// revision was decided.
    ///
    /// # Errors
    /// Returns `Err(PublishError)` only when nothing was written: invalid
    /// file id, export, parse, image, render or revision failures.
    pub async fn publish(&self, file_id: &str) -> Result<PublishOutcome, PublishError> {
        let start = Instant::now();
        let artifact = self.render(file_id).await?;

        let lease = LockLease::acquire(&self.locks, file_id);
        let _guard = lease.mutex.lock().await;
        self.publish_locked(file_id, artifact, start).await
    }

    /// Resolve the revision and write. The caller holds the file's lock.
    async fn publish_locked(
        &self,
        file_id: &str,
        artifact: RenderedArtifact,
        start: Instant,
    ) -> Result<PublishOutcome, PublishError> {
        let observer = self.observer();

        observer.on_stage(file_id, Stage::ResolveRevision);
        let (revision, basis) =
            revision::resolve_next_revision(self.objects.as_ref(), &self.layout, file_id).await?;

        let mut meta = artifact.meta;
        meta.revision = revision;
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| PublishError::Internal(format!("encode metadata: {e}")))?;

        observer.on_stage(file_id, Stage::Write);
        let (written, failures) = self
            .write_all(
                file_id,
                revision,
                artifact.html.as_bytes(),
                &meta_json,
                &artifact.images,
            )
            .await;

        observer.on_publish_complete(file_id, revision, failures.len());
        let report = PublishReport {
            meta,
            written,
            revision_basis: basis,
        };
        if failures.is_empty() {
            info!(
                file_id = %file_id,
                revision,
                objects = report.written.len(),
                "Published in {}ms",
                start.elapsed().as_millis()
            );
            Ok(PublishOutcome::Complete(report))
        } else {
            warn!(
                file_id = %file_id,
                revision,
                failed = failures.len(),
                "Published with {} failed write(s)",
                failures.len()
            );
            Ok(PublishOutcome::Partial { report, failures })
        }
    }

    /// Write HTML, metadata and images to both the revision and `latest`
    /// trees, bounded by `write_concurrency`. Every write is attempted.
    async fn write_all(
        &self,
        file_id: &str,
        revision: u32,
        html: &[u8],
        meta_json: &[u8],
        images: &[ImageBuffer],
    ) -> (Vec<String>, Vec<WriteFailure>) {
        let trees = [RevisionRef::Latest, RevisionRef::Number(revision)];
        let mut plan: Vec<(String, &[u8], &'static str)> = Vec::with_capacity(4 + 2 * images.len());
        for tree in trees {
            plan.push((
                self.layout.html(file_id, tree),
                html,
                content_type_for("index.html"),
            ));
        }
        for tree in trees {
            plan.push((
                self.layout.meta(file_id, tree),
                meta_json,
                content_type_for("meta.json"),
            ));
        }
        for tree in trees {
            for image in images {
                plan.push((
                    self.layout.image(file_id, tree, &image.filename),
                    &image.content,
                    image.content_type(),
                ));
            }
        }

        let observer = self.observer();
        observer.on_write_start(file_id, revision, plan.len());
        info!(
            file_id = %file_id,
            revision,
            writes = plan.len(),
            "Writing {} object(s)",
            plan.len()
        );

        let objects = self.objects.as_ref();
        let writes: Vec<_> = plan
            .into_iter()
            .enumerate()
            .map(|(i, (path, data, content_type))| async move {
                let result = objects
                    .write(&path, data, content_type)
                    .await
                    .map_err(|e| e.to_string());
                match &result {
                    Ok(bytes) => {
                        debug!("wrote {} ({} bytes)", path, bytes);
                        observer.on_write_complete(file_id, &path, *bytes);
                    }
                    Err(e) => {
                        warn!("write {} failed: {}", path, e);
                        observer.on_write_failed(file_id, &path, e);
                    }
                }
                (i, path, result)
            })
            .collect();
        let mut results: Vec<(usize, String, Result<u64, String>)> = stream::iter(writes)
            .buffer_unordered(self.config.write_concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _, _)| *i);

        let mut written = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (_, path, result) in results {
            match result {
                Ok(_) => written.push(path),
                Err(error) => failures.push(WriteFailure { path, error }),
            }
        }
        (written, failures)
    }

    /// Synchronous wrapper around [`Publisher::publish`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn publish_sync(&self, file_id: &str) -> Result<PublishOutcome, PublishError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| PublishError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.publish(file_id))
    }

    // ── Read paths ────────────────────────────────────────────────────────

    /// The published page for `revision` (`latest`, `0` or a number).
    pub async fn view(&self, file_id: &str, revision: &str) -> Result<String, ReadError> {
        let tree = self.read_target(file_id, revision)?;
        let path = self.layout.html(file_id, tree);
        let bytes = self.objects.read(&path).await?;
        String::from_utf8(bytes).map_err(|e| ReadError::Decode {
            path,
            detail: e.to_string(),
        })
    }

    /// A published image: `(content_type, bytes)`.
    pub async fn media(
        &self,
        file_id: &str,
        revision: &str,
        filename: &str,
    ) -> Result<(&'static str, Vec<u8>), ReadError> {
        let tree = self.read_target(file_id, revision)?;
        if !is_valid_media_filename(filename) {
            return Err(ReadError::InvalidFilename(filename.to_string()));
        }
        let path = self.layout.image(file_id, tree, filename);
        let bytes = self.objects.read(&path).await?;
        Ok((content_type_for(filename), bytes))
    }

    /// The published metadata record.
    pub async fn meta(&self, file_id: &str, revision: &str) -> Result<PublishMeta, ReadError> {
        let tree = self.read_target(file_id, revision)?;
        let path = self.layout.meta(file_id, tree);
        let bytes = self.objects.read(&path).await?;
        serde_json::from_slice(&bytes).map_err(|e| ReadError::Decode {
            path,
            detail: e.to_string(),
        })
    }

    fn read_target(&self, file_id: &str, revision: &str) -> Result<RevisionRef, ReadError> {
        if !is_valid_file_id(file_id) {
            return Err(ReadError::InvalidFileId(file_id.to_string()));
        }
        RevisionRef::parse(revision)
    }
}

/// A publish's hold on its file's entry in the lock table.
///
/// Dropping the lease, whether the publish finished or its future was
/// dropped mid-await, removes the entry once no other publish holds it.
struct LockLease<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    file_id: &'a str,
    mutex: Arc<Mutex<()>>,
}

impl<'a> LockLease<'a> {
    fn acquire(locks: &'a DashMap<String, Arc<Mutex<()>>>, file_id: &'a str) -> Self {
        let mutex = Arc::clone(&locks.entry(file_id.to_string()).or_default());
        Self {
            locks,
            file_id,
            mutex,
        }
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        // Release our reference first so the count below sees only the table's.
        drop(std::mem::take(&mut self.mutex));
        self.locks
            .remove_if(self.file_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

// ── Response envelope ─────────────────────────────────────────────────────

/// Uniform response shape: `code` 0 on success, an error code otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiEnvelope<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Envelope for a fatal publish or preview error.
    pub fn from_publish_error(err: &PublishError) -> Self {
        Self::error(err.code(), err.to_string())
    }

    /// Envelope for a read-path error; the code is the HTTP-style status.
    pub fn from_read_error(err: &ReadError) -> Self {
        Self::error(i32::from(err.status_code()), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, ParseError, StoreError};
    use crate::store::{MemoryObjectStore, MemorySource};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoImages;

    #[async_trait]
    impl Fetcher for NoImages {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
                body: String::new(),
            })
        }
    }

    const DOC: &str = "# Lab\n\n## One\n\nHello.\n";

    fn publisher(objects: Arc<MemoryObjectStore>) -> Publisher {
        let source = MemorySource::new().with_document("doc", DOC);
        Publisher::new(
            Arc::new(source),
            objects,
            Arc::new(NoImages),
            PublishConfig::default(),
        )
    }

    #[test]
    fn envelope_shapes() {
        let ok = serde_json::to_value(ApiEnvelope::ok(7)).unwrap();
        assert_eq!(
            ok,
            serde_json::json!({"code": 0, "message": "ok", "data": 7})
        );

        let err: ApiEnvelope<()> =
            ApiEnvelope::from_publish_error(&PublishError::Parse(ParseError::NoSteps));
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["code"], 1003);
        assert!(json.get("data").is_none());

        let err: ApiEnvelope<()> = ApiEnvelope::from_read_error(&ReadError::NotFound("p".into()));
        assert_eq!(err.code, 404);
    }

    #[tokio::test]
    async fn lock_table_is_emptied_after_publish() {
        let objects = Arc::new(MemoryObjectStore::new());
        let p = publisher(objects.clone());
        let outcome = p.publish("doc").await.unwrap();
        assert!(outcome.is_complete());
        assert!(p.locks.is_empty());
        assert_eq!(objects.len(), 4);
    }

    /// Reads never complete, so a publish parks inside the lock.
    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn read(&self, _path: &str) -> Result<Vec<u8>, StoreError> {
            std::future::pending().await
        }

        async fn write(&self, _path: &str, data: &[u8], _ct: &str) -> Result<u64, StoreError> {
            Ok(data.len() as u64)
        }
    }

    #[tokio::test]
    async fn cancelled_publish_releases_its_lock_entry() {
        let p = Publisher::new(
            Arc::new(MemorySource::new().with_document("doc", DOC)),
            Arc::new(StalledStore),
            Arc::new(NoImages),
            PublishConfig::default(),
        );

        let publish = tokio::time::timeout(Duration::from_millis(50), p.publish("doc"));
        assert!(publish.await.is_err(), "publish should still be waiting");
        assert!(p.locks.is_empty());
    }

    #[tokio::test]
    async fn lock_entry_survives_while_another_publish_waits() {
        let objects = Arc::new(MemoryObjectStore::new());
        let p = publisher(objects);
        let waiting = LockLease::acquire(&p.locks, "doc");

        p.publish("doc").await.unwrap();
        assert_eq!(p.locks.len(), 1);

        drop(waiting);
        assert!(p.locks.is_empty());
    }

    #[tokio::test]
    async fn invalid_file_id_is_rejected_before_export() {
        let p = publisher(Arc::new(MemoryObjectStore::new()));
        let err = p.publish("../etc").await.unwrap_err();
        assert!(matches!(err, PublishError::InvalidFileId { .. }));
        assert_eq!(err.code(), 1001);
    }

    #[tokio::test]
    async fn missing_source_is_an_export_error() {
        let p = publisher(Arc::new(MemoryObjectStore::new()));
        let err = p.render("other").await.unwrap_err();
        match err {
            PublishError::SourceExport { file_id, source } => {
                assert_eq!(file_id, "other");
                assert!(source.is_not_found());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn publish_sync_runs_outside_a_runtime() {
        let objects = Arc::new(MemoryObjectStore::new());
        let p = publisher(objects.clone());
        let outcome = p.publish_sync("doc").unwrap();
        assert_eq!(outcome.revision(), 1);
        assert!(objects.get("files-dev/doc/1/index.html").is_some());
    }
}
