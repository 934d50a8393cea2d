//! Renderer: project a [`Document`] and global values into page HTML.
//!
//! Step bodies are rendered to HTML here, in Rust, and handed to the
//! template pre-escaped; the template only lays out the page shell. That
//! keeps user templates small and means a broken template can never leak
//! unescaped document text.

use crate::config::RenderOptions;
use crate::document::{AsideKind, ColumnAlign, ContentNode, Document, DocumentMeta, ImageNode};
use crate::error::RenderError;
use crate::template::{DEFAULT_TEMPLATE, TEMPLATE_NAME};
use minijinja::{AutoEscape, Environment};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error};

#[derive(Serialize)]
struct PageContext<'a> {
    env: &'a str,
    prefix: &'a str,
    format: &'a str,
    global_ga: Option<&'a str>,
    updated: String,
    meta: &'a DocumentMeta,
    steps: Vec<StepContext<'a>>,
    extra: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct StepContext<'a> {
    index: usize,
    title: &'a str,
    duration: Option<u32>,
    html: String,
}

/// Render `doc` with `template` (or the built-in template).
///
/// `updated` is formatted as RFC 3339 and exposed as `updated`.
pub fn render(
    doc: &Document,
    options: &RenderOptions,
    template: Option<&str>,
    updated: OffsetDateTime,
) -> Result<String, RenderError> {
    let source = template.unwrap_or(DEFAULT_TEMPLATE);

    let updated = updated.format(&Rfc3339).map_err(|e| RenderError {
        template: TEMPLATE_NAME.to_string(),
        detail: format!("format timestamp: {e}"),
    })?;

    let context = PageContext {
        env: &options.environment,
        prefix: &options.prefix,
        format: &options.format,
        global_ga: options.global_ga.as_deref(),
        updated,
        meta: &doc.meta,
        steps: doc
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| StepContext {
                index: i + 1,
                title: &step.title,
                duration: step.duration_minutes,
                html: render_nodes(&step.nodes),
            })
            .collect(),
        extra: &options.extra,
    };

    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    let to_render_error = |e: minijinja::Error| {
        error!("Template '{}' failed: {:#}", TEMPLATE_NAME, e);
        RenderError {
            template: TEMPLATE_NAME.to_string(),
            detail: e.to_string(),
        }
    };
    env.add_template(TEMPLATE_NAME, source)
        .map_err(to_render_error)?;
    let html = env
        .get_template(TEMPLATE_NAME)
        .and_then(|t| t.render(&context))
        .map_err(to_render_error)?;

    debug!("Rendered '{}': {} bytes", doc.meta.id, html.len());
    Ok(html)
}

/// Render a sequence of content nodes to HTML.
pub fn render_nodes(nodes: &[ContentNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        render_node(node, &mut out);
    }
    out
}

fn render_node(node: &ContentNode, out: &mut String) {
    match node {
        ContentNode::Heading { level, html } => {
            let _ = writeln!(out, "<h{level}>{html}</h{level}>");
        }
        ContentNode::Paragraph { html } => {
            let _ = writeln!(out, "<p>{html}</p>");
        }
        ContentNode::Image(img) => {
            out.push_str(r#"<p class="image-container">"#);
            render_img(img, out);
            out.push_str("</p>\n");
        }
        ContentNode::Code { language, code } => {
            match language {
                Some(lang) => {
                    let _ = write!(
                        out,
                        r#"<pre><code class="language-{}">"#,
                        escape_html(lang)
                    );
                }
                None => out.push_str("<pre><code>"),
            }
            out.push_str(&escape_html(code));
            out.push_str("</code></pre>\n");
        }
        ContentNode::List {
            ordered,
            start,
            items,
        } => {
            match (ordered, start) {
                (true, Some(n)) => {
                    let _ = writeln!(out, r#"<ol start="{n}">"#);
                }
                (true, None) => out.push_str("<ol>\n"),
                (false, _) => out.push_str("<ul>\n"),
            }
            for item in items {
                out.push_str("<li>");
                match item.as_slice() {
                    [ContentNode::Paragraph { html }] => out.push_str(html),
                    nodes => out.push_str(render_nodes(nodes).trim_end()),
                }
                out.push_str("</li>\n");
            }
            out.push_str(if *ordered { "</ol>\n" } else { "</ul>\n" });
        }
        ContentNode::Aside { kind, nodes } => {
            let inner = render_nodes(nodes);
            match kind {
                AsideKind::Quote => {
                    let _ = write!(out, "<blockquote>\n{inner}</blockquote>\n");
                }
                AsideKind::Warning | AsideKind::Caution => {
                    let _ = write!(
                        out,
                        "<aside class=\"warning\" data-kind=\"{}\">\n{inner}</aside>\n",
                        kind.as_str()
                    );
                }
                AsideKind::Note | AsideKind::Tip | AsideKind::Important => {
                    let _ = write!(
                        out,
                        "<aside class=\"special\" data-kind=\"{}\">\n{inner}</aside>\n",
                        kind.as_str()
                    );
                }
            }
        }
        ContentNode::Table {
            alignments,
            head,
            rows,
        } => {
            out.push_str("<table>\n");
            if !head.is_empty() {
                out.push_str("<thead>\n");
                render_row("th", head, alignments, out);
                out.push_str("</thead>\n");
            }
            if !rows.is_empty() {
                out.push_str("<tbody>\n");
                for row in rows {
                    render_row("td", row, alignments, out);
                }
                out.push_str("</tbody>\n");
            }
            out.push_str("</table>\n");
        }
        ContentNode::Html { html } => {
            out.push_str(html);
            if !html.ends_with('\n') {
                out.push('\n');
            }
        }
        ContentNode::Rule => out.push_str("<hr>\n"),
    }
}

fn render_img(img: &ImageNode, out: &mut String) {
    let _ = write!(
        out,
        r#"<img src="{}" alt="{}""#,
        escape_html(&img.src),
        escape_html(&img.alt)
    );
    if let Some(ref title) = img.title {
        let _ = write!(out, r#" title="{}""#, escape_html(title));
    }
    out.push('>');
}

fn render_row(
    tag: &str,
    cells: &[Vec<ContentNode>],
    alignments: &[ColumnAlign],
    out: &mut String,
) {
    out.push_str("<tr>");
    for (i, cell) in cells.iter().enumerate() {
        match alignments.get(i).and_then(ColumnAlign::as_css) {
            Some(align) => {
                let _ = write!(out, r#"<{tag} style="text-align: {align}">"#);
            }
            None => {
                let _ = write!(out, "<{tag}>");
            }
        }
        // Cell content stays inline.
        for node in cell {
            match node {
                ContentNode::Paragraph { html } => out.push_str(html),
                ContentNode::Image(img) => render_img(img, out),
                other => out.push_str(render_nodes(std::slice::from_ref(other)).trim_end()),
            }
        }
        let _ = write!(out, "</{tag}>");
    }
    out.push_str("</tr>\n");
}

/// Escape text for HTML element content and quoted attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ImageNode, Step};
    use time::macros::datetime;

    fn sample() -> Document {
        Document {
            meta: DocumentMeta {
                id: "lab".into(),
                title: "Fish & Chips".into(),
                feedback_link: "https://f".into(),
                ..Default::default()
            },
            steps: vec![
                Step {
                    title: "Intro".into(),
                    duration_minutes: Some(2),
                    nodes: vec![
                        ContentNode::Paragraph {
                            html: "Hello <em>there</em>".into(),
                        },
                        ContentNode::Image(ImageNode {
                            src: "img/abc.png".into(),
                            alt: "a \"quote\"".into(),
                            title: None,
                        }),
                    ],
                },
                Step {
                    title: "Code".into(),
                    duration_minutes: None,
                    nodes: vec![ContentNode::Code {
                        language: Some("rust".into()),
                        code: "if a < b {}".into(),
                    }],
                },
            ],
        }
    }

    const AT: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

    #[test]
    fn default_template_renders_steps_and_meta() {
        let html = render(&sample(), &RenderOptions::default(), None, AT).unwrap();
        assert!(html.contains(r#"<title>Fish &amp; Chips</title>"#), "{html}");
        assert!(html.contains(r#"content="2024-05-01T12:00:00Z""#));
        assert!(html.contains(r#"<google-codelab-step label="Intro" duration="2">"#));
        assert!(html.contains(r#"<google-codelab-step label="Code" duration="0">"#));
        assert!(html.contains("<p>Hello <em>there</em></p>"));
        assert!(html.contains(r#"<img src="img/abc.png" alt="a &quot;quote&quot;">"#));
        assert!(html.contains("if a &lt; b {}"));
        assert!(html.contains("https://storage.googleapis.com/claat-public/codelab-elements.js"));
        // Document values are escaped, including '/'.
        assert!(html.contains(r#"feedback-link="https:"#));
    }

    #[test]
    fn steps_keep_document_order() {
        let html = render(&sample(), &RenderOptions::default(), None, AT).unwrap();
        let intro = html.find("label=\"Intro\"").unwrap();
        let code = html.find("label=\"Code\"").unwrap();
        assert!(intro < code);
    }

    #[test]
    fn custom_template_and_options() {
        let mut options = RenderOptions::default();
        options.environment = "kiosk".into();
        options.global_ga = Some("UA-9".into());
        options.extra.insert("theme".into(), "dark".into());
        let tmpl = "{{ env }}|{{ global_ga }}|{{ extra.theme }}|{% for s in steps %}{{ s.index }}:{{ s.title }};{% endfor %}";
        let out = render(&sample(), &options, Some(tmpl), AT).unwrap();
        assert_eq!(out, "kiosk|UA-9|dark|1:Intro;2:Code;");
    }

    #[test]
    fn broken_template_is_a_render_error() {
        let err = render(&sample(), &RenderOptions::default(), Some("{% for %}"), AT).unwrap_err();
        assert_eq!(err.template, TEMPLATE_NAME);
        assert!(!err.detail.is_empty());
    }

    #[test]
    fn failing_filter_is_a_render_error() {
        let tmpl = "{{ steps|nosuchfilter }}";
        assert!(render(&sample(), &RenderOptions::default(), Some(tmpl), AT).is_err());
    }

    #[test]
    fn lists_and_asides() {
        let nodes = vec![
            ContentNode::List {
                ordered: true,
                start: Some(3),
                items: vec![
                    vec![ContentNode::Paragraph { html: "a".into() }],
                    vec![
                        ContentNode::Paragraph { html: "b".into() },
                        ContentNode::Rule,
                    ],
                ],
            },
            ContentNode::Aside {
                kind: AsideKind::Warning,
                nodes: vec![ContentNode::Paragraph { html: "careful".into() }],
            },
        ];
        let html = render_nodes(&nodes);
        assert!(html.contains("<ol start=\"3\">\n<li>a</li>\n<li><p>b</p>\n<hr></li>\n</ol>"), "{html}");
        assert!(html.contains("<aside class=\"warning\" data-kind=\"warning\">\n<p>careful</p>\n</aside>"));
    }

    #[test]
    fn table_cells_render_inline_images() {
        let nodes = vec![ContentNode::Table {
            alignments: vec![ColumnAlign::None, ColumnAlign::Center],
            head: vec![
                vec![ContentNode::Paragraph { html: "a".into() }],
                vec![ContentNode::Paragraph { html: "b".into() }],
            ],
            rows: vec![vec![
                vec![ContentNode::Paragraph { html: "1".into() }],
                vec![
                    ContentNode::Paragraph { html: "see".into() },
                    ContentNode::Image(ImageNode {
                        src: "img/x.png".into(),
                        alt: "x".into(),
                        title: None,
                    }),
                ],
            ]],
        }];
        let html = render_nodes(&nodes);
        assert_eq!(
            html,
            "<table>\n<thead>\n<tr><th>a</th><th style=\"text-align: center\">b</th></tr>\n</thead>\n\
             <tbody>\n<tr><td>1</td><td style=\"text-align: center\">see<img src=\"img/x.png\" alt=\"x\"></td></tr>\n\
             </tbody>\n</table>\n"
        );
    }

    #[test]
    fn escape_covers_attribute_quotes() {
        assert_eq!(escape_html(r#"<a href="x">'&'"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;");
    }
}
