//! Page templates for rendered codelabs.
//!
//! The template only lays out the page shell: head tags, the analytics
//! element, and one `google-codelab-step` per step. Step bodies arrive as
//! pre-rendered HTML from [`crate::pipeline::render`].
//!
//! Callers can override the default via [`crate::config::PublishConfig::template`];
//! the constant here is used only when no override is provided.
//!
//! ## Context
//!
//! | Name | Value |
//! |------|-------|
//! | `env`, `prefix`, `format`, `global_ga` | from [`crate::config::RenderOptions`] |
//! | `updated` | RFC 3339 render time |
//! | `meta` | document metadata (camelCase keys) |
//! | `steps` | `{ index, title, duration, html }` per step; `html` is pre-escaped |
//! | `extra` | free-form string map |

/// Name the page template is registered under.
pub const TEMPLATE_NAME: &str = "codelab.html";

/// Default page template.
///
/// This template is used when `PublishConfig::template` is `None`.
pub const DEFAULT_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, minimum-scale=1.0, initial-scale=1.0, user-scalable=yes">
  <meta name="codelab-env" content="{{ env }}">
  <meta name="codelab-format" content="{{ format }}">
  <meta name="codelab-updated" content="{{ updated }}">
{%- for key, value in extra|items %}
  <meta name="codelab-{{ key }}" content="{{ value }}">
{%- endfor %}
  <title>{{ meta.title }}</title>
  <link rel="stylesheet" href="//fonts.googleapis.com/css?family=Source+Code+Pro:400|Roboto:400,300,400italic,500,700|Roboto+Mono">
  <link rel="stylesheet" href="{{ prefix|safe }}/claat-public/codelab-elements.css">
  <style>
    .success { color: #1e8e3e; }
    .error { color: red; }
  </style>
</head>
<body>
  <google-codelab-analytics gaid="{{ global_ga or '' }}"></google-codelab-analytics>
  <google-codelab codelab-gaid="{{ meta.analyticsAccount or '' }}"
                  id="{{ meta.id }}"
                  title="{{ meta.title }}"
                  environment="{{ env }}"
                  feedback-link="{{ meta.feedbackLink or '' }}">
{%- for step in steps %}
    <google-codelab-step label="{{ step.title }}" duration="{{ step.duration or 0 }}">
{{ step.html|safe }}
    </google-codelab-step>
{%- endfor %}
  </google-codelab>

  <script src="{{ prefix|safe }}/claat-public/native-shim.js"></script>
  <script src="{{ prefix|safe }}/claat-public/custom-elements.min.js"></script>
  <script src="{{ prefix|safe }}/claat-public/prettify.js"></script>
  <script src="{{ prefix|safe }}/claat-public/codelab-elements.js"></script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_marks_step_html_safe() {
        assert!(DEFAULT_TEMPLATE.contains("{{ step.html|safe }}"));
    }

    #[test]
    fn prefix_is_trusted_configuration() {
        assert!(!DEFAULT_TEMPLATE.contains("{{ prefix }}"));
        assert!(DEFAULT_TEMPLATE.contains("{{ prefix|safe }}/claat-public/"));
    }

    #[test]
    fn default_template_is_html() {
        assert!(DEFAULT_TEMPLATE.starts_with("<!doctype html>"));
        assert!(TEMPLATE_NAME.ends_with(".html"));
    }
}
