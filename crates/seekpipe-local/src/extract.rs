//! Markup to plain text.

use seekpipe_core::HtmlParser;
use std::io::Cursor;

/// Column width handed to html2text; long enough that wrapping rarely splits words.
pub const DEFAULT_WIDTH: usize = 200;

/// Convert HTML to readable plain text.
///
/// Deterministic and "good enough", not a readability engine. On renderer
/// failure the input is returned unchanged.
pub fn html_to_text(html: &str, width: usize) -> String {
    // html2text expects bytes; Cursor avoids allocating a second large buffer.
    html2text::from_read(Cursor::new(html.as_bytes()), width).unwrap_or_else(|_| html.to_string())
}

pub fn has_any_text(s: &str) -> bool {
    s.chars().any(|c| !c.is_whitespace())
}

pub fn bytes_look_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let s = String::from_utf8_lossy(head).to_ascii_lowercase();
    let s = s.trim_start();
    s.starts_with("<!doctype html")
        || s.starts_with("<html")
        || s.starts_with("<head")
        || s.starts_with("<body")
        || s.contains("<html")
        || s.contains("<p>")
        || s.contains("<div")
}

fn strip_tag_blocks(html: &str, tag: &str) -> String {
    // Only removes a block when its close tag is found; tag names match
    // ASCII-case-insensitively.
    let tag_lc = tag.to_ascii_lowercase();
    let open_pat = format!("<{}", tag_lc);
    let close_pat = format!("</{}>", tag_lc);

    let mut out = String::new();
    let mut i = 0usize;
    let lower = html.to_ascii_lowercase();
    while let Some(rel_start) = lower[i..].find(&open_pat) {
        let start = i + rel_start;
        let after_open = start + open_pat.len();
        if let Some(rel_end) = lower[after_open..].find(&close_pat) {
            let end = after_open + rel_end + close_pat.len();
            out.push_str(&html[i..start]);
            i = end;
        } else {
            break;
        }
    }
    out.push_str(&html[i..]);
    out
}

/// [`HtmlParser`] backed by html2text.
///
/// Script, style and noscript blocks are stripped first so code never counts
/// as content. Bodies that don't look like markup pass through as text.
#[derive(Debug, Clone)]
pub struct Html2TextParser {
    width: usize,
}

impl Html2TextParser {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(20),
        }
    }
}

impl Default for Html2TextParser {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH)
    }
}

impl HtmlParser for Html2TextParser {
    fn parse(&self, raw: &[u8]) -> String {
        let body = String::from_utf8_lossy(raw);
        if !bytes_look_like_html(raw) {
            return body.into_owned();
        }
        let html = strip_tag_blocks(&body, "script");
        let html = strip_tag_blocks(&html, "style");
        let html = strip_tag_blocks(&html, "noscript");
        let text = html_to_text(&html, self.width);
        if has_any_text(&text) {
            text
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_simple_html() {
        let html = r#"<html><body><h1>Hello</h1><p>world</p></body></html>"#;
        let out = html_to_text(html, 80);
        assert!(out.contains("Hello"));
        assert!(out.contains("world"));
    }

    #[test]
    fn parser_drops_script_and_style_blocks() {
        let html = br#"<html><head><style>body{color:red}</style></head>
            <body><script>var secret = 1;</script><p>visible text</p></body></html>"#;
        let out = Html2TextParser::default().parse(html);
        assert!(out.contains("visible text"));
        assert!(!out.contains("secret"));
        assert!(!out.contains("color:red"));
    }

    #[test]
    fn parser_passes_plain_text_through() {
        let out = Html2TextParser::default().parse(b"just some words");
        assert_eq!(out, "just some words");
    }

    #[test]
    fn parser_never_fails_on_broken_markup() {
        let out = Html2TextParser::default().parse(b"<html><body><p>unclosed <b>bold");
        assert!(out.contains("unclosed"));
        let empty = Html2TextParser::default().parse(b"<html><script>x()</script></html>");
        assert!(empty.is_empty());
    }
}
