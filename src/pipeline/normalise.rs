//! Normalisation: deterministic cleanup of exported source text.
//!
//! ## Why is normalisation necessary?
//!
//! Document-store exports are produced by word processors, not by people
//! typing Markdown. They carry artefacts that are invisible in the editor but
//! change how the text parses:
//!
//! - a UTF-8 byte-order mark in front of the first header line
//! - zero-width spaces and soft hyphens pasted in from web pages
//! - Windows-style `\r\n` line endings
//! - "blank" lines that contain a stray tab or non-breaking space, which
//!   stop the metadata header from ending where the author intended
//!
//! Each rule is a pure `&str → String` pass so the order is explicit and
//! every rule is independently testable.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules to an exported document.
///
/// Rules (applied in order):
/// 1. Strip invisible Unicode (BOM, zero-width spaces, soft hyphens, …)
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Empty lines that contain only whitespace
/// 4. Ensure the text ends with exactly one newline
pub fn normalise_source(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = normalise_line_endings(&s);
    let s = blank_whitespace_lines(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip invisible characters ───────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    const INVISIBLE: &[char] = &[
        '\u{FEFF}', // byte-order mark
        '\u{200B}', // zero-width space
        '\u{200C}', // zero-width non-joiner
        '\u{200D}', // zero-width joiner
        '\u{2060}', // word joiner
        '\u{00AD}', // soft hyphen
    ];
    input.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Whitespace-only lines become empty ───────────────────────────────

static RE_WHITESPACE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t\u{00A0}]+$").unwrap());

fn blank_whitespace_lines(input: &str) -> String {
    RE_WHITESPACE_LINE.replace_all(input, "").into_owned()
}

// ── Rule 4: Final newline ────────────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end_matches('\n');
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}
