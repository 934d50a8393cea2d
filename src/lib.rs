//! # codelabs-preview
//!
//! Preview and publish step-by-step tutorials ("codelabs") from exported
//! source documents.
//!
//! ## Why this crate?
//!
//! Authors write codelabs in a document store; readers see them as a static
//! HTML page plus images on an object store. This crate sits in between: it
//! exports a document, parses it into ordered steps, downloads every image
//! and names it by checksum, renders the page, and writes it under a
//! revision-addressed path so every publish stays reachable while `latest`
//! always points at the newest one.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file id
//!  │
//!  ├─ 1. Export    fetch the source document from the SourceStore
//!  ├─ 2. Parse     header block, title, `##` steps → Document
//!  ├─ 3. Media     fetch images concurrently, CRC-64 names, rewrite src
//!  ├─ 4. Render    MiniJinja page template → HTML
//!  ├─ 5. Meta      meta.json record (totalChapters, exportedDate, …)
//!  ├─ 6. Revision  latest/meta.json revision + 1 (per-file lock held)
//!  └─ 7. Write     HTML + meta + images → latest/ and <revision>/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codelabs_preview::{DirectorySource, FsObjectStore, PublishConfig, Publisher};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PublishConfig::builder().storage_path("files-dev").build()?;
//!     let publisher = Publisher::with_http_fetcher(
//!         Arc::new(DirectorySource::new("docs")),
//!         Arc::new(FsObjectStore::new("out")),
//!         config,
//!     )?;
//!     let outcome = publisher.publish("my-lab").await?;
//!     eprintln!("published revision {}", outcome.revision());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `codelabs-preview` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! codelabs-preview = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod store;
pub mod template;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Clock, FixedClock, PublishConfig, PublishConfigBuilder, RenderOptions, SystemClock,
};
pub use document::{AsideKind, ColumnAlign, ContentNode, Document, DocumentMeta, ImageNode, Step};
pub use error::{
    FetchError, MediaError, ParseError, PublishError, ReadError, RenderError, StoreError,
    StoreErrorKind, WriteFailure,
};
pub use output::{
    ImageBuffer, MetaEx, PublishMeta, PublishOutcome, PublishReport, RenderedArtifact,
    RevisionBasis,
};
pub use paths::{ObjectLayout, RevisionRef};
pub use pipeline::fetch::{Fetcher, HttpClient, HttpResponse, ReqwestClient, RetryingFetcher};
pub use progress::{NoopObserver, Observer, PublishObserver, Stage};
pub use publish::{ApiEnvelope, Publisher};
pub use store::{
    DirectorySource, FsObjectStore, HttpSource, MemoryObjectStore, MemorySource, ObjectStore,
    SourceStore, StoredObject,
};
