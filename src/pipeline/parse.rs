//! Document parser: exported Markdown → [`Document`].
//!
//! ## Source layout
//!
//! ```text
//! id: my-codelab               ┐
//! summary: Learn things        │ header: `key: value` lines up to the
//! authors: Jane Doe, Sam Roe   ┘ first blank line or heading
//!
//! # Codelab Title              ← title (first level-1 heading)
//!
//! ## First step                ← every level-2 heading starts a step
//! Duration: 2:00               ← optional, first paragraph of a step
//!
//! Text, ![images](https://…), lists, code fences, tables,
//! > [!TIP] alerts
//! ```
//!
//! The event walk is a small state machine: one open *capture* (paragraph,
//! heading, code block, HTML block) plus a stack of open *containers*
//! (lists, block quotes, tables). Finished nodes go to the innermost
//! container, or to the current step when no container is open.
//!
//! Images are lifted out of the paragraph, table cell or heading that
//! contains them so the media extractor can rewrite every reference through
//! one node type. A heading keeps the alt text and its images follow it.

use crate::document::{
    AsideKind, ColumnAlign, ContentNode, Document, DocumentMeta, ImageNode, Step,
};
use crate::error::ParseError;
use crate::pipeline::normalise::normalise_source;
use crate::pipeline::render::escape_html;
use once_cell::sync::Lazy;
use pulldown_cmark::{
    Alignment, BlockQuoteKind, CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd,
};
use regex::Regex;
use std::fmt::Write;
use tracing::{debug, warn};

/// Parse an exported document.
///
/// Deterministic: the same bytes always produce the same [`Document`].
pub fn parse(raw: &[u8]) -> Result<Document, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|e| ParseError::InvalidEncoding {
        valid_up_to: e.valid_up_to(),
    })?;
    let text = normalise_source(text);
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let (mut meta, body) = split_header(&text);

    let mut builder = Builder::default();
    for event in Parser::new_ext(body, markdown_options()) {
        builder.event(event);
    }
    if builder.dropped_preamble > 0 {
        debug!(
            "Dropped {} node(s) between the title and the first step",
            builder.dropped_preamble
        );
    }

    let title = builder.title.ok_or(ParseError::MissingTitle)?;
    if builder.steps.is_empty() {
        return Err(ParseError::NoSteps);
    }

    meta.title = title;
    if meta.id.is_empty() {
        meta.id = slugify(&meta.title);
    }
    meta.duration = builder
        .steps
        .iter()
        .filter_map(|s| s.duration_minutes)
        .sum();

    debug!(
        "Parsed codelab '{}': {} steps, {} min",
        meta.id,
        builder.steps.len(),
        meta.duration
    );

    Ok(Document {
        meta,
        steps: builder.steps,
    })
}

fn markdown_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_GFM
}

// ── Header ───────────────────────────────────────────────────────────────────

static RE_HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9 _-]*?)\s*:\s*(.*?)\s*$").unwrap());

/// Split the leading `key: value` block from the body.
///
/// The block ends at the first blank line or heading. Any other line that
/// is not `key: value` means there is no header and the whole text is body.
fn split_header(text: &str) -> (DocumentMeta, &str) {
    let mut meta = DocumentMeta::default();
    let mut consumed = 0usize;
    let mut pairs = Vec::new();

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if trimmed.is_empty() || trimmed.starts_with('#') {
            break;
        }
        match RE_HEADER_LINE.captures(trimmed) {
            Some(caps) => pairs.push((caps[1].to_string(), caps[2].to_string())),
            None => return (meta, text),
        }
        consumed += line.len();
    }

    for (key, value) in pairs {
        apply_header(&mut meta, &key, value);
    }
    (meta, &text[consumed..])
}

fn apply_header(meta: &mut DocumentMeta, key: &str, value: String) {
    let normalised: String = key
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect();
    match normalised.as_str() {
        "id" | "url" => meta.id = value,
        "summary" => meta.summary = value,
        "author" | "authors" => meta.authors = split_list(&value),
        "category" | "categories" => meta.categories = split_list(&value),
        "tag" | "tags" | "environments" => meta.tags = split_list(&value),
        "status" => meta.status = value,
        "feedbacklink" => meta.feedback_link = value,
        "analyticsaccount" | "googleanalytics" => meta.analytics_account = value,
        _ => {
            meta.extra.insert(key.trim().to_string(), value);
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercase ASCII slug: runs of non-alphanumerics become one `-`.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

// ── Duration ─────────────────────────────────────────────────────────────────

static RE_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^duration:\s*(\d{1,4}(?::\d{1,2}){1,2})$").unwrap());

/// `M:SS` or `H:MM:SS` → whole minutes, rounded up.
fn parse_duration(text: &str) -> Option<u32> {
    let caps = RE_DURATION.captures(text.trim())?;
    let parts: Vec<u32> = caps[1]
        .split(':')
        .map(str::parse::<u32>)
        .collect::<Result<_, _>>()
        .ok()?;
    let seconds = match parts.as_slice() {
        [m, s] => m * 60 + s,
        [h, m, s] => h * 3600 + m * 60 + s,
        _ => return None,
    };
    Some(seconds.div_ceil(60))
}

// ── Event walk ───────────────────────────────────────────────────────────────

#[derive(Default)]
enum Capture {
    #[default]
    None,
    Paragraph {
        html: String,
        text: String,
        implicit: bool,
    },
    Heading {
        level: u8,
        html: String,
        text: String,
        images: Vec<ImageNode>,
    },
    Code {
        language: Option<String>,
        code: String,
    },
    HtmlBlock {
        html: String,
    },
}

enum Container {
    List {
        ordered: bool,
        start: Option<u64>,
        items: Vec<Vec<ContentNode>>,
        current: Option<Vec<ContentNode>>,
    },
    Aside {
        kind: AsideKind,
        nodes: Vec<ContentNode>,
    },
    Table {
        alignments: Vec<ColumnAlign>,
        head: Vec<Vec<ContentNode>>,
        rows: Vec<Vec<Vec<ContentNode>>>,
        row: Vec<Vec<ContentNode>>,
        cell: Option<Vec<ContentNode>>,
    },
}

struct PendingImage {
    src: String,
    title: String,
    alt: String,
}

#[derive(Default)]
struct Builder {
    title: Option<String>,
    steps: Vec<Step>,
    containers: Vec<Container>,
    capture: Capture,
    image: Option<PendingImage>,
    /// Inline tags open in the current paragraph: (opening markup, closing markup).
    open_inline: Vec<(String, &'static str)>,
    dropped_preamble: usize,
}

impl Builder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start_tag(tag),
            Event::End(tag) => self.end_tag(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                let html = format!("<code>{}</code>", escape_html(&code));
                self.inline(&html, &code);
            }
            Event::InlineHtml(html) => self.inline(&html, &html),
            Event::Html(html) => match &mut self.capture {
                Capture::HtmlBlock { html: buf } => buf.push_str(&html),
                _ => self.push_node(ContentNode::Html {
                    html: html.to_string(),
                }),
            },
            Event::SoftBreak => self.inline("\n", " "),
            Event::HardBreak => self.inline("<br>", " "),
            Event::Rule => {
                self.close_implicit_paragraph();
                self.push_node(ContentNode::Rule);
            }
            Event::TaskListMarker(checked) => {
                let html = if checked {
                    r#"<input type="checkbox" checked disabled> "#
                } else {
                    r#"<input type="checkbox" disabled> "#
                };
                self.inline(html, if checked { "[x] " } else { "[ ] " });
            }
            Event::FootnoteReference(name) => {
                let html = format!("<sup>{}</sup>", escape_html(&name));
                self.inline(&html, &name);
            }
            Event::InlineMath(math) | Event::DisplayMath(math) => {
                let html = format!("<code>{}</code>", escape_html(&math));
                self.inline(&html, &math);
            }
        }
    }

    fn start_tag(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                self.close_implicit_paragraph();
                self.open_inline.clear();
                self.capture = Capture::Paragraph {
                    html: String::new(),
                    text: String::new(),
                    implicit: false,
                };
            }
            Tag::Heading { level, .. } => {
                self.close_implicit_paragraph();
                self.open_inline.clear();
                self.capture = Capture::Heading {
                    level: heading_level_to_num(level),
                    html: String::new(),
                    text: String::new(),
                    images: Vec::new(),
                };
            }
            Tag::BlockQuote(kind) => {
                self.close_implicit_paragraph();
                self.containers.push(Container::Aside {
                    kind: aside_kind(kind),
                    nodes: Vec::new(),
                });
            }
            Tag::CodeBlock(kind) => {
                self.close_implicit_paragraph();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(|l| l.trim_matches(|c| c == '{' || c == '}' || c == '.'))
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                self.capture = Capture::Code {
                    language,
                    code: String::new(),
                };
            }
            Tag::HtmlBlock => {
                self.close_implicit_paragraph();
                self.capture = Capture::HtmlBlock {
                    html: String::new(),
                };
            }
            Tag::List(start) => {
                self.close_implicit_paragraph();
                self.containers.push(Container::List {
                    ordered: start.is_some(),
                    start: start.filter(|n| *n != 1),
                    items: Vec::new(),
                    current: None,
                });
            }
            Tag::Item => {
                if let Some(Container::List { current, .. }) = self.containers.last_mut() {
                    *current = Some(Vec::new());
                }
            }
            Tag::Table(alignments) => {
                self.close_implicit_paragraph();
                self.containers.push(Container::Table {
                    alignments: alignments.into_iter().map(column_align).collect(),
                    head: Vec::new(),
                    rows: Vec::new(),
                    row: Vec::new(),
                    cell: None,
                });
            }
            Tag::TableHead | Tag::TableRow => {
                if let Some(Container::Table { row, .. }) = self.containers.last_mut() {
                    row.clear();
                }
            }
            Tag::TableCell => {
                if let Some(Container::Table { cell, .. }) = self.containers.last_mut() {
                    *cell = Some(Vec::new());
                }
            }
            Tag::Emphasis => self.open_tag("<em>".to_string(), "</em>"),
            Tag::Strong => self.open_tag("<strong>".to_string(), "</strong>"),
            Tag::Strikethrough => self.open_tag("<s>".to_string(), "</s>"),
            Tag::Superscript => self.open_tag("<sup>".to_string(), "</sup>"),
            Tag::Subscript => self.open_tag("<sub>".to_string(), "</sub>"),
            Tag::Link {
                dest_url, title, ..
            } => {
                let mut open = format!(r#"<a href="{}""#, escape_html(&dest_url));
                if !title.is_empty() {
                    let _ = write!(open, r#" title="{}""#, escape_html(&title));
                }
                open.push('>');
                self.open_tag(open, "</a>");
            }
            Tag::Image {
                dest_url, title, ..
            } => {
                self.ensure_inline();
                self.image = Some(PendingImage {
                    src: dest_url.to_string(),
                    title: title.to_string(),
                    alt: String::new(),
                });
            }
            Tag::FootnoteDefinition(_)
            | Tag::MetadataBlock(_)
            | Tag::DefinitionList
            | Tag::DefinitionListTitle
            | Tag::DefinitionListDefinition => {}
        }
    }

    fn end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => self.finish_paragraph(),
            TagEnd::Heading(_) => self.finish_heading(),
            TagEnd::BlockQuote(_) => {
                self.close_implicit_paragraph();
                if let Some(Container::Aside { kind, nodes }) = self.containers.pop() {
                    self.push_node(ContentNode::Aside { kind, nodes });
                }
            }
            TagEnd::CodeBlock => {
                if let Capture::Code { language, code } = std::mem::take(&mut self.capture) {
                    self.push_node(ContentNode::Code { language, code });
                }
            }
            TagEnd::HtmlBlock => {
                if let Capture::HtmlBlock { html } = std::mem::take(&mut self.capture) {
                    self.push_node(ContentNode::Html { html });
                }
            }
            TagEnd::List(_) => {
                self.close_implicit_paragraph();
                if let Some(Container::List {
                    ordered,
                    start,
                    items,
                    ..
                }) = self.containers.pop()
                {
                    self.push_node(ContentNode::List {
                        ordered,
                        start,
                        items,
                    });
                }
            }
            TagEnd::Item => {
                self.close_implicit_paragraph();
                if let Some(Container::List { items, current, .. }) = self.containers.last_mut() {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                }
            }
            TagEnd::Table => {
                if let Some(Container::Table {
                    alignments,
                    head,
                    rows,
                    ..
                }) = self.containers.pop()
                {
                    self.push_node(ContentNode::Table {
                        alignments,
                        head,
                        rows,
                    });
                }
            }
            TagEnd::TableHead => {
                if let Some(Container::Table { head, row, .. }) = self.containers.last_mut() {
                    *head = std::mem::take(row);
                }
            }
            TagEnd::TableRow => {
                if let Some(Container::Table { rows, row, .. }) = self.containers.last_mut() {
                    rows.push(std::mem::take(row));
                }
            }
            TagEnd::TableCell => {
                self.close_implicit_paragraph();
                if let Some(Container::Table { row, cell, .. }) = self.containers.last_mut() {
                    row.push(cell.take().unwrap_or_default());
                }
            }
            TagEnd::Image => self.finish_image(),
            TagEnd::Emphasis
            | TagEnd::Strong
            | TagEnd::Strikethrough
            | TagEnd::Superscript
            | TagEnd::Subscript
            | TagEnd::Link => self.close_tag(),
            TagEnd::FootnoteDefinition
            | TagEnd::MetadataBlock(_)
            | TagEnd::DefinitionList
            | TagEnd::DefinitionListTitle
            | TagEnd::DefinitionListDefinition => {}
        }
    }

    // ── Inline content ──────────────────────────────────────────────────────

    fn text(&mut self, text: &str) {
        match &mut self.capture {
            Capture::Code { code, .. } => code.push_str(text),
            Capture::HtmlBlock { html } => html.push_str(text),
            _ => self.inline(&escape_html(text), text),
        }
    }

    /// Append inline markup (and its plain-text form) to whatever is open.
    fn inline(&mut self, html: &str, text: &str) {
        if let Some(image) = self.image.as_mut() {
            image.alt.push_str(text);
            return;
        }
        self.ensure_inline();
        match &mut self.capture {
            Capture::Paragraph {
                html: buf,
                text: plain,
                ..
            }
            | Capture::Heading {
                html: buf,
                text: plain,
                ..
            } => {
                buf.push_str(html);
                plain.push_str(text);
            }
            _ => {}
        }
    }

    fn open_tag(&mut self, open: String, close: &'static str) {
        if self.image.is_some() {
            return;
        }
        self.ensure_inline();
        self.inline_markup(&open);
        self.open_inline.push((open, close));
    }

    fn close_tag(&mut self) {
        if self.image.is_some() {
            return;
        }
        if let Some((_, close)) = self.open_inline.pop() {
            self.inline_markup(close);
        }
    }

    fn inline_markup(&mut self, markup: &str) {
        match &mut self.capture {
            Capture::Paragraph { html, .. } | Capture::Heading { html, .. } => {
                html.push_str(markup)
            }
            _ => {}
        }
    }

    /// Tight list items emit inline events with no paragraph around them.
    fn ensure_inline(&mut self) {
        if matches!(self.capture, Capture::None) {
            self.open_inline.clear();
            self.capture = Capture::Paragraph {
                html: String::new(),
                text: String::new(),
                implicit: true,
            };
        }
    }

    fn close_implicit_paragraph(&mut self) {
        if matches!(self.capture, Capture::Paragraph { implicit: true, .. }) {
            self.finish_paragraph();
        }
    }

    // ── Finishing captures ──────────────────────────────────────────────────

    fn finish_paragraph(&mut self) {
        let Capture::Paragraph { html, text, .. } = std::mem::take(&mut self.capture) else {
            return;
        };
        self.open_inline.clear();

        if self.containers.is_empty() {
            if let Some(step) = self.steps.last_mut() {
                if step.nodes.is_empty() && step.duration_minutes.is_none() {
                    if let Some(minutes) = parse_duration(&text) {
                        step.duration_minutes = Some(minutes);
                        return;
                    }
                }
            }
        }

        if !text.trim().is_empty() {
            self.push_node(ContentNode::Paragraph {
                html: html.trim().to_string(),
            });
        }
    }

    fn finish_heading(&mut self) {
        let Capture::Heading {
            level,
            html,
            text,
            images,
        } = std::mem::take(&mut self.capture)
        else {
            return;
        };
        self.open_inline.clear();
        let text = text.trim().to_string();

        if self.containers.is_empty() && level == 1 && self.title.is_none() {
            self.title = Some(text);
        } else if self.containers.is_empty() && level == 2 {
            if self.title.is_none() {
                warn!("Step '{}' appears before the codelab title", text);
            }
            self.steps.push(Step {
                title: text,
                duration_minutes: None,
                nodes: Vec::new(),
            });
        } else {
            self.push_node(ContentNode::Heading {
                level: level.max(3),
                html: html.trim().to_string(),
            });
        }

        for image in images {
            self.push_node(ContentNode::Image(image));
        }
    }

    /// Lift the image out of the surrounding paragraph.
    ///
    /// Text before the image is flushed as its own paragraph with every open
    /// inline tag closed; the tags are re-opened for the text that follows.
    fn finish_image(&mut self) {
        let Some(image) = self.image.take() else {
            return;
        };

        let node = ImageNode {
            src: image.src,
            alt: image.alt,
            title: (!image.title.is_empty()).then_some(image.title),
        };

        if let Capture::Heading {
            html, text, images, ..
        } = &mut self.capture
        {
            html.push_str(&escape_html(&node.alt));
            text.push_str(&node.alt);
            images.push(node);
            return;
        }

        let implicit = matches!(self.capture, Capture::Paragraph { implicit: true, .. });
        if let Capture::Paragraph { html, text, .. } = &mut self.capture {
            let mut before = std::mem::take(html);
            let had_text = !std::mem::take(text).trim().is_empty();
            for (_, close) in self.open_inline.iter().rev() {
                before.push_str(close);
            }
            for (open, _) in &self.open_inline {
                html.push_str(open);
            }
            if had_text {
                let paragraph = ContentNode::Paragraph {
                    html: before.trim().to_string(),
                };
                self.push_node(paragraph);
            }
        }

        self.push_node(ContentNode::Image(node));

        // An implicit paragraph that only held the image leaves nothing behind.
        if implicit && self.open_inline.is_empty() {
            if let Capture::Paragraph { html, .. } = &self.capture {
                if html.is_empty() {
                    self.capture = Capture::None;
                }
            }
        }
    }

    fn push_node(&mut self, node: ContentNode) {
        match self.containers.last_mut() {
            Some(Container::List {
                current: Some(item),
                ..
            }) => item.push(node),
            Some(Container::List { items, .. }) => items.push(vec![node]),
            Some(Container::Aside { nodes, .. }) => nodes.push(node),
            Some(Container::Table { cell, .. }) => match cell {
                Some(cell) => cell.push(node),
                None => debug!("Dropped node outside a table cell"),
            },
            None => match self.steps.last_mut() {
                Some(step) => step.nodes.push(node),
                None => self.dropped_preamble += 1,
            },
        }
    }
}

fn heading_level_to_num(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn column_align(align: Alignment) -> ColumnAlign {
    match align {
        Alignment::None => ColumnAlign::None,
        Alignment::Left => ColumnAlign::Left,
        Alignment::Center => ColumnAlign::Center,
        Alignment::Right => ColumnAlign::Right,
    }
}

fn aside_kind(kind: Option<BlockQuoteKind>) -> AsideKind {
    match kind {
        Some(BlockQuoteKind::Note) => AsideKind::Note,
        Some(BlockQuoteKind::Tip) => AsideKind::Tip,
        Some(BlockQuoteKind::Important) => AsideKind::Important,
        Some(BlockQuoteKind::Warning) => AsideKind::Warning,
        Some(BlockQuoteKind::Caution) => AsideKind::Caution,
        None => AsideKind::Quote,
    }
}
