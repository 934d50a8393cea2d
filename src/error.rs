//! Error types for the codelabs-preview library.
//!
//! Three distinct error families reflect three distinct failure modes:
//!
//! * [`PublishError`]: **Fatal**: the publish (or preview) cannot proceed at
//!   all (source export failed, document unparseable, an image could not be
//!   fetched, the template blew up). Returned as `Err(PublishError)` from the
//!   top-level [`crate::Publisher`] operations. Nothing has been written when
//!   one of these is returned.
//!
//! * [`WriteFailure`]: **Non-fatal**: a single object write failed after the
//!   revision was already decided. Stored inside
//!   [`crate::output::PublishOutcome::Partial`] so callers can see exactly
//!   which paths are missing instead of losing the whole publish report.
//!
//! * [`ReadError`]: failures of the read paths (`view`, `media`, `meta`),
//!   each mapping to an HTTP-style status code.
//!
//! Lower-level errors ([`FetchError`], [`ParseError`], [`MediaError`],
//! [`RenderError`], [`StoreError`]) belong to one pipeline stage each and are
//! wrapped by [`PublishError`] when they abort a publish.

use std::fmt;
use thiserror::Error;

/// All fatal errors returned by the publish and preview operations.
///
/// Write failures use [`WriteFailure`] and are stored in
/// [`crate::output::PublishOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PublishError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The file id is empty or contains characters outside `[A-Za-z0-9_-]`.
    #[error("Invalid file id '{file_id}': expected letters, digits, '-' or '_'")]
    InvalidFileId { file_id: String },

    /// The document store refused or failed to export the source document.
    #[error("Failed to export document '{file_id}': {source}")]
    SourceExport {
        file_id: String,
        #[source]
        source: StoreError,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The exported document could not be turned into a codelab.
    #[error("Failed to parse document: {0}")]
    Parse(#[from] ParseError),

    /// At least one referenced image could not be fetched.
    #[error("Failed to extract images:\n{0}")]
    MediaExtraction(#[from] MediaError),

    /// Template compilation or execution failed.
    #[error("Failed to render codelab: {0}")]
    Render(#[from] RenderError),

    /// The previously published metadata could not be read.
    ///
    /// "Not found" is not an error (it means first publish); this variant
    /// covers permission and availability failures where guessing a revision
    /// would risk overwriting an existing one.
    #[error("Failed to resolve revision for '{file_id}': {source}")]
    RevisionResolve {
        file_id: String,
        #[source]
        source: StoreError,
    },

    // ── Outcome errors ────────────────────────────────────────────────────
    /// Some writes succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::PublishOutcome::into_result`] when the
    /// caller wants to treat any write failure as an error.
    #[error("{failed}/{total} writes failed while publishing revision {revision}")]
    PartialWrite {
        revision: u32,
        failed: usize,
        total: usize,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PublishError {
    /// Stable numeric code for the error kind. `0` is reserved for success.
    ///
    /// These codes travel in [`crate::publish::ApiEnvelope::code`] so clients
    /// can branch on the failure kind without parsing messages.
    pub fn code(&self) -> i32 {
        match self {
            PublishError::InvalidFileId { .. } => 1001,
            PublishError::SourceExport { .. } => 1002,
            PublishError::Parse(_) => 1003,
            PublishError::MediaExtraction(_) => 1004,
            PublishError::Render(_) => 1005,
            PublishError::RevisionResolve { .. } => 1006,
            PublishError::PartialWrite { .. } => 1007,
            PublishError::InvalidConfig(_) => 1008,
            PublishError::Internal(_) => 1099,
        }
    }
}

// ── Fetch ─────────────────────────────────────────────────────────────────

/// A failure fetching one remote asset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The URL does not parse.
    #[error("invalid url: {reason}")]
    InvalidUrl { reason: String },

    /// The URL parses but uses a scheme the fetcher cannot serve.
    #[error("unsupported url scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },

    /// Connection, TLS or timeout failure before a status line arrived.
    #[error("transport error: {detail}")]
    Transport { detail: String },

    /// The server answered with a non-retryable status.
    #[error("fetch {url}: {status}; {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// Every attempt failed with a retryable error.
    #[error("{url}: failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// A `data:` URI whose payload is not valid base64.
    #[error("malformed data uri: {detail}")]
    MalformedDataUri { detail: String },

    /// The fetched bytes are too short to sniff an image type from.
    #[error("image too short: {len} bytes")]
    ImageTooShort { len: usize },
}

// ── Parse ─────────────────────────────────────────────────────────────────

/// The exported document could not be parsed into a codelab.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The export contained no content at all.
    #[error("document is empty")]
    Empty,

    /// The export is not valid UTF-8 text.
    #[error("document is not valid UTF-8 (at byte {valid_up_to})")]
    InvalidEncoding { valid_up_to: usize },

    /// No level-1 heading was found to use as the codelab title.
    #[error("document has no title (expected a '# Title' heading)")]
    MissingTitle,

    /// No level-2 headings were found, so the codelab has no steps.
    #[error("document has no steps (expected '## Step' headings)")]
    NoSteps,
}

// ── Media ─────────────────────────────────────────────────────────────────

/// Aggregate of every image fetch that failed during extraction.
///
/// Extraction is all-or-nothing: if this is returned, no image buffers were
/// produced, even for the URLs that did succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaError {
    /// `(url, error)` pairs in document order.
    pub failures: Vec<(String, FetchError)>,
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (url, err) in &self.failures {
            writeln!(f, "{url} => {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MediaError {}

// ── Render ────────────────────────────────────────────────────────────────

/// Template compilation or execution failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("template '{template}': {detail}")]
pub struct RenderError {
    pub template: String,
    pub detail: String,
}

// ── Store ─────────────────────────────────────────────────────────────────

/// Failure categories for object and source stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The object does not exist.
    NotFound,
    /// The credentials do not allow the operation.
    PermissionDenied,
    /// The backend is unreachable or timed out.
    Unavailable,
    /// Anything else.
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreErrorKind::NotFound => "not found",
            StoreErrorKind::PermissionDenied => "permission denied",
            StoreErrorKind::Unavailable => "unavailable",
            StoreErrorKind::Other => "error",
        };
        f.write_str(name)
    }
}

/// An object store read or write failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message} (path: {path})")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub path: String,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, path, "object does not exist")
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }

    /// Map an I/O error onto a store error for `path`.
    pub fn from_io(path: impl Into<String>, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => StoreErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StoreErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => StoreErrorKind::Unavailable,
            _ => StoreErrorKind::Other,
        };
        Self::new(kind, path, err.to_string())
    }
}

/// A single object write that failed during the publish fan-out.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize)]
#[error("write {path}: {error}")]
pub struct WriteFailure {
    pub path: String,
    pub error: String,
}

// ── Read paths ────────────────────────────────────────────────────────────

/// Errors from the `view`, `media` and `meta` read paths.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    /// Empty or malformed file id.
    #[error("invalid file id '{0}'")]
    InvalidFileId(String),

    /// Revision is neither `latest` nor a number.
    #[error("invalid revision '{0}': expected 'latest' or a number")]
    InvalidRevision(String),

    /// Media filename is empty or escapes the image directory.
    #[error("invalid media filename '{0}'")]
    InvalidFilename(String),

    /// The requested object has never been published.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object exists but could not be read.
    #[error(transparent)]
    Store(StoreError),

    /// Stored metadata is not valid JSON.
    #[error("corrupt metadata at {path}: {detail}")]
    Decode { path: String, detail: String },
}

impl ReadError {
    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ReadError::InvalidFileId(_)
            | ReadError::InvalidRevision(_)
            | ReadError::InvalidFilename(_) => 400,
            ReadError::NotFound(_) => 404,
            ReadError::Store(_) | ReadError::Decode { .. } => 500,
        }
    }
}

impl From<StoreError> for ReadError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            ReadError::NotFound(err.path)
        } else {
            ReadError::Store(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_write_display() {
        let e = PublishError::PartialWrite {
            revision: 4,
            failed: 1,
            total: 6,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/6"), "got: {msg}");
        assert!(msg.contains("revision 4"), "got: {msg}");
    }

    #[test]
    fn media_error_lists_every_url() {
        let e = MediaError {
            failures: vec![
                (
                    "https://a/x.png".into(),
                    FetchError::Status {
                        url: "https://a/x.png".into(),
                        status: 404,
                        body: "gone".into(),
                    },
                ),
                (
                    "https://b/y.png".into(),
                    FetchError::ImageTooShort { len: 3 },
                ),
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("https://a/x.png => fetch https://a/x.png: 404; gone"));
        assert!(msg.contains("https://b/y.png => image too short: 3 bytes"));
        assert_eq!(msg.lines().count(), 2);
    }

    #[test]
    fn codes_are_distinct_and_nonzero() {
        let errors = [
            PublishError::InvalidFileId { file_id: "".into() },
            PublishError::SourceExport {
                file_id: "a".into(),
                source: StoreError::new(StoreErrorKind::Unavailable, "a", "x"),
            },
            PublishError::Parse(ParseError::Empty),
            PublishError::MediaExtraction(MediaError { failures: vec![] }),
            PublishError::Render(RenderError {
                template: "t".into(),
                detail: "d".into(),
            }),
            PublishError::RevisionResolve {
                file_id: "a".into(),
                source: StoreError::not_found("p"),
            },
            PublishError::PartialWrite {
                revision: 1,
                failed: 1,
                total: 4,
            },
            PublishError::InvalidConfig("x".into()),
            PublishError::Internal("x".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn read_error_status_codes() {
        assert_eq!(ReadError::InvalidFileId(String::new()).status_code(), 400);
        assert_eq!(ReadError::InvalidRevision("abc".into()).status_code(), 400);
        assert_eq!(ReadError::NotFound("p".into()).status_code(), 404);
        let store = StoreError::new(StoreErrorKind::Unavailable, "p", "down");
        assert_eq!(ReadError::from(store).status_code(), 500);
    }

    #[test]
    fn store_not_found_maps_to_read_not_found() {
        let e = ReadError::from(StoreError::not_found("files-dev/a/latest/index.html"));
        assert_eq!(e, ReadError::NotFound("files-dev/a/latest/index.html".into()));
    }

    #[test]
    fn store_error_from_io_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let e = StoreError::from_io("x", &io);
        assert_eq!(e.kind, StoreErrorKind::PermissionDenied);
        assert!(e.to_string().contains("permission denied"));
    }
}
