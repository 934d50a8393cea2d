//! In-memory codelab document model.
//!
//! A [`Document`] is what the parser produces and what the media extractor
//! and renderer consume. Steps are kept in source order; that order is the
//! rendering order and the chapter numbering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parsed codelab.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub meta: DocumentMeta,
    pub steps: Vec<Step>,
}

impl Document {
    /// Every image node, depth-first in document order.
    pub fn image_nodes_mut(&mut self) -> Vec<&mut ImageNode> {
        let mut out = Vec::new();
        for step in &mut self.steps {
            collect_images(&mut step.nodes, &mut out);
        }
        out
    }

    /// Every image node, depth-first in document order.
    pub fn image_nodes(&self) -> Vec<&ImageNode> {
        fn walk<'a>(nodes: &'a [ContentNode], out: &mut Vec<&'a ImageNode>) {
            for node in nodes {
                match node {
                    ContentNode::Image(img) => out.push(img),
                    ContentNode::List { items, .. } => {
                        for item in items {
                            walk(item, out);
                        }
                    }
                    ContentNode::Aside { nodes, .. } => walk(nodes, out),
                    ContentNode::Table { head, rows, .. } => {
                        for cell in head.iter().chain(rows.iter().flatten()) {
                            walk(cell, out);
                        }
                    }
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        for step in &self.steps {
            walk(&step.nodes, &mut out);
        }
        out
    }
}

fn collect_images<'a>(nodes: &'a mut [ContentNode], out: &mut Vec<&'a mut ImageNode>) {
    for node in nodes {
        match node {
            ContentNode::Image(img) => out.push(img),
            ContentNode::List { items, .. } => {
                for item in items {
                    collect_images(item, out);
                }
            }
            ContentNode::Aside { nodes, .. } => collect_images(nodes, out),
            ContentNode::Table { head, rows, .. } => {
                for cell in head.iter_mut().chain(rows.iter_mut().flatten()) {
                    collect_images(cell, out);
                }
            }
            _ => {}
        }
    }
}

/// One top-level section of a codelab.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub title: String,
    /// Estimated duration in whole minutes, from a `Duration: M:SS` line.
    pub duration_minutes: Option<u32>,
    pub nodes: Vec<ContentNode>,
}

/// A unit of content inside a step.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentNode {
    /// Sub-heading inside a step (level 3–6). `html` is inline markup.
    Heading { level: u8, html: String },
    /// Inline markup that renders inside `<p>`.
    Paragraph { html: String },
    Image(ImageNode),
    Code {
        language: Option<String>,
        code: String,
    },
    List {
        ordered: bool,
        start: Option<u64>,
        items: Vec<Vec<ContentNode>>,
    },
    Aside {
        kind: AsideKind,
        nodes: Vec<ContentNode>,
    },
    /// Cells hold inline content: paragraphs and the images lifted out of them.
    Table {
        alignments: Vec<ColumnAlign>,
        head: Vec<Vec<ContentNode>>,
        rows: Vec<Vec<Vec<ContentNode>>>,
    },
    /// Raw HTML that is emitted as-is.
    Html { html: String },
    Rule,
}

/// An image reference. `src` starts as the remote URL and is rewritten to a
/// local relative path once the image has been extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNode {
    pub src: String,
    pub alt: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAlign {
    None,
    Left,
    Center,
    Right,
}

impl ColumnAlign {
    pub fn as_css(&self) -> Option<&'static str> {
        match self {
            ColumnAlign::None => None,
            ColumnAlign::Left => Some("left"),
            ColumnAlign::Center => Some("center"),
            ColumnAlign::Right => Some("right"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsideKind {
    Note,
    Tip,
    Important,
    Warning,
    Caution,
    Quote,
}

impl AsideKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AsideKind::Note => "note",
            AsideKind::Tip => "tip",
            AsideKind::Important => "important",
            AsideKind::Warning => "warning",
            AsideKind::Caution => "caution",
            AsideKind::Quote => "quote",
        }
    }
}

/// Document-level metadata, passed through to the template and the
/// persisted metadata record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feedback_link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub analytics_account: String,
    /// Total estimated minutes across all steps.
    #[serde(default)]
    pub duration: u32,
    /// Header keys that did not match a known field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(src: &str) -> ContentNode {
        ContentNode::Image(ImageNode {
            src: src.into(),
            alt: String::new(),
            title: None,
        })
    }

    #[test]
    fn image_nodes_are_found_at_any_depth() {
        let mut doc = Document {
            meta: DocumentMeta::default(),
            steps: vec![
                Step {
                    title: "one".into(),
                    duration_minutes: None,
                    nodes: vec![
                        image("a"),
                        ContentNode::List {
                            ordered: false,
                            start: None,
                            items: vec![vec![image("b")], vec![ContentNode::Rule]],
                        },
                    ],
                },
                Step {
                    title: "two".into(),
                    duration_minutes: Some(3),
                    nodes: vec![
                        ContentNode::Aside {
                            kind: AsideKind::Tip,
                            nodes: vec![image("c")],
                        },
                        ContentNode::Table {
                            alignments: vec![ColumnAlign::None],
                            head: vec![vec![image("d")]],
                            rows: vec![vec![vec![image("e")]]],
                        },
                    ],
                },
            ],
        };

        let srcs: Vec<&str> = doc.image_nodes().iter().map(|n| n.src.as_str()).collect();
        assert_eq!(srcs, ["a", "b", "c", "d", "e"]);

        for node in doc.image_nodes_mut() {
            node.src = format!("img/{}", node.src);
        }
        let srcs: Vec<&str> = doc.image_nodes().iter().map(|n| n.src.as_str()).collect();
        assert_eq!(srcs, ["img/a", "img/b", "img/c", "img/d", "img/e"]);
    }

    #[test]
    fn meta_serialises_camel_case_and_skips_empty() {
        let meta = DocumentMeta {
            id: "x".into(),
            title: "T".into(),
            feedback_link: "https://f".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["feedbackLink"], "https://f");
        assert!(json.get("summary").is_none());
        assert!(json.get("tags").is_none());
        assert_eq!(json["duration"], 0);
    }
}
