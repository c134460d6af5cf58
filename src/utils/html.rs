//! HTML-to-text conversion for the parser (spec §4.5).
//!
//! Strips `<script>`/`<style>` content, walks the remaining text nodes with
//! line separators between elements, then collapses runs of whitespace so
//! sectionisation sees clean single-spaced lines.

use scraper::{Html, Selector};
use std::sync::OnceLock;

fn script_style_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("script, style").unwrap())
}

/// Extract plain text from an HTML document, one line per text node.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let skip = script_style_selector();

    let skipped_ids: std::collections::HashSet<_> =
        document.select(skip).map(|el| el.id()).collect();

    let mut lines = Vec::new();
    for node in document.tree.nodes() {
        if let Some(text) = node.value().as_text() {
            if let Some(parent) = node.parent() {
                if skipped_ids.contains(&parent.id()) {
                    continue;
                }
            }
            let normalized = normalize_whitespace(text);
            if !normalized.is_empty() {
                lines.push(normalized);
            }
        }
    }

    lines.join("\n")
}

/// Collapse runs of whitespace (including newlines) into single spaces and
/// trim the ends.
fn normalize_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = true;
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_script_and_style() {
        let html = "<html><head><style>body{color:red}</style></head>\
                     <body><script>alert(1)</script><p>Item 1. Business</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Item 1. Business"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn test_collapses_whitespace() {
        let html = "<p>hello\n\n   world  </p>";
        let text = html_to_text(html);
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_multiple_block_elements_become_separate_lines() {
        let html = "<div>first</div><div>second</div>";
        let text = html_to_text(html);
        assert_eq!(text, "first\nsecond");
    }
}
