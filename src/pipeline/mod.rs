//! Pipeline stages for turning a source document into a published codelab.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets the publisher compose
//! them differently for preview and publish.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ normalise ──▶ parse ──▶ media ──▶ render ──▶ meta ──▶ revision
//! (bytes)    (cleanup)     (AST)     (fetch)   (HTML)     (JSON)   (N + 1)
//! ```
//!
//! 1. [`normalise`]: strip invisible characters and unify line endings
//! 2. [`parse`]    : header block, title and steps into a [`crate::document::Document`]
//! 3. [`media`]    : fetch every image, name it by content and rewrite `src`;
//!    the only stage besides `fetch` with network I/O
//! 4. [`render`]   : lay the document out through the page template
//! 5. [`meta`]     : build the `meta.json` record
//! 6. [`revision`] : read the `latest` pointer and choose the next revision
//!
//! [`fetch`] carries the retry and backoff policy shared by image downloads.

pub mod fetch;
pub mod media;
pub mod meta;
pub mod normalise;
pub mod parse;
pub mod render;
pub mod revision;
