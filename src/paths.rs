//! Object-store path layout.
//!
//! ```text
//! <storage>/<fileId>/latest/index.html
//! <storage>/<fileId>/latest/meta.json
//! <storage>/<fileId>/latest/<imageDir>/<filename>
//! <storage>/<fileId>/<revision>/index.html
//! <storage>/<fileId>/<revision>/meta.json
//! <storage>/<fileId>/<revision>/<imageDir>/<filename>
//! ```
//!
//! Published URLs are derived from these paths, so the layout is a public
//! contract: changing a segment breaks every link already handed out.

use crate::error::ReadError;
use std::fmt;

pub const LATEST: &str = "latest";
pub const HTML_FILE: &str = "index.html";
pub const META_FILE: &str = "meta.json";

/// Which published snapshot to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionRef {
    Latest,
    Number(u32),
}

impl RevisionRef {
    /// Parse a revision segment as clients send it.
    ///
    /// `latest` (any case) and `0` both mean the latest pointer; positive
    /// integers address a specific revision.
    pub fn parse(s: &str) -> Result<Self, ReadError> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(LATEST) {
            return Ok(RevisionRef::Latest);
        }
        match s.parse::<u32>() {
            Ok(0) => Ok(RevisionRef::Latest),
            Ok(n) => Ok(RevisionRef::Number(n)),
            Err(_) => Err(ReadError::InvalidRevision(s.to_string())),
        }
    }
}

impl fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionRef::Latest => f.write_str(LATEST),
            RevisionRef::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Builds object paths for one storage prefix and image directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    storage_path: String,
    image_dir: String,
}

impl ObjectLayout {
    pub fn new(storage_path: impl Into<String>, image_dir: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            image_dir: image_dir.into(),
        }
    }

    pub fn image_dir(&self) -> &str {
        &self.image_dir
    }

    /// `<storage>/<fileId>/<revision>`
    pub fn root(&self, file_id: &str, revision: RevisionRef) -> String {
        if self.storage_path.is_empty() {
            format!("{file_id}/{revision}")
        } else {
            format!("{}/{file_id}/{revision}", self.storage_path)
        }
    }

    pub fn html(&self, file_id: &str, revision: RevisionRef) -> String {
        format!("{}/{HTML_FILE}", self.root(file_id, revision))
    }

    pub fn meta(&self, file_id: &str, revision: RevisionRef) -> String {
        format!("{}/{META_FILE}", self.root(file_id, revision))
    }

    pub fn image(&self, file_id: &str, revision: RevisionRef, filename: &str) -> String {
        format!("{}/{}/{filename}", self.root(file_id, revision), self.image_dir)
    }
}

/// A file id is non-empty and made of `[A-Za-z0-9_-]`.
pub fn is_valid_file_id(file_id: &str) -> bool {
    !file_id.is_empty()
        && file_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// A media filename is a single segment of `[A-Za-z0-9._-]`, not `.` or `..`.
pub fn is_valid_media_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
}
