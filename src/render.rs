//! Report rendering
//!
//! The monitor hands every finished [`SessionDiff`] to a [`ReportRenderer`]
//! and stores whatever text and HTML it produces. [`PlainRenderer`] is the
//! built-in implementation: a plain text listing, wrapped in `<pre>` for the
//! HTML body.

use crate::session_diff::SessionDiff;
use std::fmt::Write;

/// Turns a session diff into report bodies
pub trait ReportRenderer: Send + Sync {
    /// Plain text body
    fn render_text(&self, diff: &SessionDiff) -> String;

    /// HTML body; `text` is the output of [`ReportRenderer::render_text`]
    fn render_html(&self, diff: &SessionDiff, text: &str) -> String;
}

/// Plain text renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl ReportRenderer for PlainRenderer {
    fn render_text(&self, diff: &SessionDiff) -> String {
        let mut out = String::new();

        let host = diff.new.hostname.as_deref().unwrap_or("unknown host");
        let _ = writeln!(out, "system changes on {}", host);
        let _ = writeln!(
            out,
            "{} resources found, {} lost, {} changed, {} checked\n",
            diff.found.len(),
            diff.lost.len(),
            diff.diffs.len(),
            diff.common.len()
        );
        let _ = write!(out, "{}", diff);

        for (key, value) in &diff.extra {
            let _ = writeln!(out, "\n{}:", key);
            for line in value.lines() {
                let _ = writeln!(out, "    {}", line);
            }
        }
        out
    }

    fn render_html(&self, _diff: &SessionDiff, text: &str) -> String {
        format!("<html><body><pre>{}</pre></body></html>", escape_html(text))
    }
}

/// Escape the characters that are significant in HTML text
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
