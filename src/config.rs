//! Configuration types for codelab publishing.
//!
//! All publish behaviour is controlled through [`PublishConfig`], built via
//! its [`PublishConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share one config between the preview and publish paths, log it
//! at startup, and diff two deployments to understand why their outputs
//! differ.
//!
//! # Design choice: injected clock
//! The `updated` timestamp in the rendered page and the `exportedDate` in the
//! metadata both come from [`PublishConfig::clock`]. Tests swap in a
//! [`FixedClock`] so the rendered bytes are reproducible.

use crate::error::PublishError;
use crate::progress::PublishObserver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

/// Source of "now" for timestamps written into artifacts.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Global values exposed to the page template.
///
/// These mirror the hosting environment rather than the document: every
/// codelab rendered by one deployment shares them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Environment tag passed to the template. Default: `"web"`.
    pub environment: String,

    /// URL prefix of the hosting bucket. Default: `"https://storage.googleapis.com"`.
    pub prefix: String,

    /// Output format tag. Default: `"html"`.
    pub format: String,

    /// Site-wide analytics id rendered next to the per-document one.
    pub global_ga: Option<String>,

    /// Free-form values made available to the template as `extra`.
    pub extra: BTreeMap<String, String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            environment: "web".to_string(),
            prefix: "https://storage.googleapis.com".to_string(),
            format: "html".to_string(),
            global_ga: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Configuration for previewing and publishing codelabs.
///
/// Built via [`PublishConfig::builder()`] or using
/// [`PublishConfig::default()`].
///
/// # Example
/// ```rust
/// use codelabs_preview::PublishConfig;
///
/// let config = PublishConfig::builder()
///     .storage_path("files-prod")
///     .fetch_concurrency(8)
///     .max_retries(3)
///     .build()
///     .unwrap();
/// assert_eq!(config.storage_path, "files-prod");
/// ```
#[derive(Clone)]
pub struct PublishConfig {
    /// Prefix under which every published object lives. Default: `"files-dev"`.
    ///
    /// Objects land at `<storage_path>/<fileId>/...`. An empty string drops
    /// the leading segment entirely.
    pub storage_path: String,

    /// Directory, relative to a revision root, holding extracted images. Default: `"img"`.
    ///
    /// Rewritten image references in the HTML are `<image_dir>/<filename>`,
    /// so changing this breaks links in previously published revisions.
    pub image_dir: String,

    /// MIME type requested from the document store's export. Default: `"text/markdown"`.
    pub export_mime_type: String,

    /// Extra attempts after the first failed image fetch. Default: 2.
    ///
    /// Image hosts behind the document store rate-limit aggressively. Two
    /// retries ride out the typical per-user quota window without stalling a
    /// publish for long on a genuinely dead link.
    pub max_retries: u32,

    /// Base unit of the retry delay in milliseconds. Default: 1000.
    ///
    /// The delay before attempt `n` is `(2^n + jitter) × retry_backoff_ms`
    /// with `jitter` uniform in `[0, 1)`: roughly 2 s, then 4 s. The jitter
    /// spreads out concurrent fetches that were rate-limited together.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds for image and source fetches. Default: 60.
    pub fetch_timeout_secs: u64,

    /// Number of image fetches in flight at once. Default: 16.
    ///
    /// A codelab with hundreds of screenshots would otherwise open hundreds
    /// of connections at once and trip the image host's rate limiter.
    pub fetch_concurrency: usize,

    /// Number of object writes in flight at once. Default: 16.
    pub write_concurrency: usize,

    /// Global template values.
    pub render: RenderOptions,

    /// Custom page template (MiniJinja). If None, uses the built-in template.
    pub template: Option<String>,

    /// Source of timestamps. Default: [`SystemClock`].
    pub clock: Arc<dyn Clock>,

    /// Optional observer for real-time publish events.
    ///
    /// Called for every stage transition, image fetch and object write.
    /// The observer is invoked from the async runtime's threads and must be
    /// `Send + Sync`.
    pub observer: Option<Arc<dyn PublishObserver>>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            storage_path: "files-dev".to_string(),
            image_dir: "img".to_string(),
            export_mime_type: "text/markdown".to_string(),
            max_retries: 2,
            retry_backoff_ms: 1000,
            fetch_timeout_secs: 60,
            fetch_concurrency: 16,
            write_concurrency: 16,
            render: RenderOptions::default(),
            template: None,
            clock: Arc::new(SystemClock),
            observer: None,
        }
    }
}

impl fmt::Debug for PublishConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishConfig")
            .field("storage_path", &self.storage_path)
            .field("image_dir", &self.image_dir)
            .field("export_mime_type", &self.export_mime_type)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("write_concurrency", &self.write_concurrency)
            .field("render", &self.render)
            .field("template", &self.template.as_ref().map(|t| t.len()))
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PublishObserver>"))
            .finish()
    }
}

impl PublishConfig {
    /// Create a new builder for `PublishConfig`.
    pub fn builder() -> PublishConfigBuilder {
        PublishConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PublishConfig`].
#[derive(Debug)]
pub struct PublishConfigBuilder {
    config: PublishConfig,
}

impl PublishConfigBuilder {
    pub fn storage_path(mut self, path: impl Into<String>) -> Self {
        self.config.storage_path = path.into().trim_matches('/').to_string();
        self
    }

    pub fn image_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.image_dir = dir.into();
        self
    }

    pub fn export_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.export_mime_type = mime.into();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(10);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n;
        self
    }

    pub fn write_concurrency(mut self, n: usize) -> Self {
        self.config.write_concurrency = n;
        self
    }

    pub fn render(mut self, options: RenderOptions) -> Self {
        self.config.render = options;
        self
    }

    pub fn global_ga(mut self, id: impl Into<String>) -> Self {
        self.config.render.global_ga = Some(id.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.render.extra.insert(key.into(), value.into());
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.config.template = Some(template.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.config.clock = clock;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PublishObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PublishConfig, PublishError> {
        let c = &self.config;
        if c.fetch_concurrency == 0 || c.write_concurrency == 0 {
            return Err(PublishError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.image_dir.is_empty()
            || c.image_dir.contains('/')
            || c.image_dir.contains('\\')
            || c.image_dir == "."
            || c.image_dir == ".."
        {
            return Err(PublishError::InvalidConfig(format!(
                "Image directory must be a single path segment, got '{}'",
                c.image_dir
            )));
        }
        if c.storage_path.split('/').any(|seg| seg == "..") {
            return Err(PublishError::InvalidConfig(format!(
                "Storage path must not contain '..', got '{}'",
                c.storage_path
            )));
        }
        if c.fetch_timeout_secs == 0 {
            return Err(PublishError::InvalidConfig(
                "Fetch timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn defaults_match_hosting_layout() {
        let c = PublishConfig::default();
        assert_eq!(c.storage_path, "files-dev");
        assert_eq!(c.image_dir, "img");
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.render.environment, "web");
        assert_eq!(c.render.prefix, "https://storage.googleapis.com");
        assert_eq!(c.render.format, "html");
    }

    #[test]
    fn builder_trims_storage_slashes() {
        let c = PublishConfig::builder()
            .storage_path("/files-prod/")
            .build()
            .unwrap();
        assert_eq!(c.storage_path, "files-prod");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = PublishConfig::builder()
            .write_concurrency(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PublishError::InvalidConfig(_)));
    }

    #[test]
    fn nested_image_dir_is_rejected() {
        for bad in ["", "a/b", "..", "."] {
            let res = PublishConfig::builder().image_dir(bad).build();
            assert!(res.is_err(), "accepted image dir {bad:?}");
        }
    }

    #[test]
    fn fixed_clock_is_stable() {
        let at = datetime!(2024-05-01 12:00:00 UTC);
        let clock = FixedClock(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn debug_hides_observer() {
        let c = PublishConfig::default();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("files-dev"));
        assert!(dbg.contains("observer: None"));
    }
}
