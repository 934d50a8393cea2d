//! Observer trait for publish events.
//!
//! Inject an [`Arc<dyn PublishObserver>`] via
//! [`crate::config::PublishConfigBuilder::observer`] to receive real-time
//! events as the pipeline moves through its stages, fetches images and
//! writes objects.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a metrics registry, an audit log, or a terminal progress
//! bar without the library knowing anything about how the host application
//! communicates. The trait is `Send + Sync` because image fetches and object
//! writes run concurrently.
//!
//! # Example
//!
//! ```rust
//! use codelabs_preview::{PublishConfig, PublishObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     writes: AtomicUsize,
//! }
//!
//! impl PublishObserver for CountingObserver {
//!     fn on_write_complete(&self, _file_id: &str, path: &str, bytes: u64) {
//!         self.writes.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("wrote {path} ({bytes} bytes)");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { writes: AtomicUsize::new(0) });
//! let config = PublishConfig::builder()
//!     .observer(observer as Arc<dyn PublishObserver>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// Pipeline stages reported through [`PublishObserver::on_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Export,
    Parse,
    ExtractMedia,
    Render,
    ResolveRevision,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Export => "export",
            Stage::Parse => "parse",
            Stage::ExtractMedia => "extract-media",
            Stage::Render => "render",
            Stage::ResolveRevision => "resolve-revision",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Called by the pipeline as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_image_fetched`, `on_image_failed`, `on_write_complete` and
/// `on_write_failed` may be called concurrently from different tasks.
/// Implementations must protect shared mutable state with appropriate
/// synchronisation primitives (e.g. `Mutex`, `AtomicUsize`).
pub trait PublishObserver: Send + Sync {
    /// Called when the pipeline enters a stage.
    fn on_stage(&self, file_id: &str, stage: Stage) {
        let _ = (file_id, stage);
    }

    /// Called once per image after it was fetched and content-addressed.
    ///
    /// # Arguments
    /// * `url`     : the original reference in the document
    /// * `filename`: the content-addressed name it will be stored under
    /// * `bytes`   : size of the image
    fn on_image_fetched(&self, file_id: &str, url: &str, filename: &str, bytes: usize) {
        let _ = (file_id, url, filename, bytes);
    }

    /// Called once per image whose fetch failed after all retries.
    fn on_image_failed(&self, file_id: &str, url: &str, error: &str) {
        let _ = (file_id, url, error);
    }

    /// Called once before the write fan-out starts.
    ///
    /// # Arguments
    /// * `revision`    : the revision being written
    /// * `total_writes`: number of objects that will be written
    fn on_write_start(&self, file_id: &str, revision: u32, total_writes: usize) {
        let _ = (file_id, revision, total_writes);
    }

    /// Called when one object write succeeds.
    fn on_write_complete(&self, file_id: &str, path: &str, bytes: u64) {
        let _ = (file_id, path, bytes);
    }

    /// Called when one object write fails. The publish continues.
    fn on_write_failed(&self, file_id: &str, path: &str, error: &str) {
        let _ = (file_id, path, error);
    }

    /// Called once after every write has been attempted.
    ///
    /// # Arguments
    /// * `revision`: the revision that was published
    /// * `failed`  : number of writes that failed
    fn on_publish_complete(&self, file_id: &str, revision: u32, failed: usize) {
        let _ = (file_id, revision, failed);
    }
}

/// A no-op implementation for callers that don't need events.
///
/// This is the default when no observer is configured.
pub struct NoopObserver;

impl PublishObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::PublishConfig`].
pub type Observer = Arc<dyn PublishObserver>;
