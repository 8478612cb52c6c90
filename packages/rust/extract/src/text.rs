//! HTML → plain text normalization.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use tracing::debug;

/// Subtrees dropped entirely.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "head", "template"];

/// Elements that end a line of text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "li", "main", "nav", "ol", "p", "pre", "section", "table", "tbody", "td", "th", "thead",
    "tr", "ul",
];

/// Flatten an HTML document to normalized plain text.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 4);
    collect_text(doc.root_element(), &mut out);
    let text = normalize_whitespace(&out);
    debug!(html_len = html.len(), text_len = text.len(), "html flattened");
    text
}

/// Text of a fetched document. HTML (by extension) is flattened, anything
/// else passes through unchanged.
pub fn document_to_text(document_name: &str, raw: &str) -> String {
    let lower = document_name.to_ascii_lowercase();
    if lower.ends_with(".htm") || lower.ends_with(".html") {
        html_to_text(raw)
    } else {
        raw.to_string()
    }
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIP_TAGS.contains(&name) {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }

    if BLOCK_TAGS.contains(&name) {
        out.push('\n');
    }
}

/// NBSP → space, collapse horizontal runs, collapse blank lines, trim.
fn normalize_whitespace(text: &str) -> String {
    static HSPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\r\f\v]+").expect("valid regex"));
    static NEWLINES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r" ?\n[\n ]*").expect("valid regex"));

    let text = text.replace('\u{a0}', " ");
    let text = HSPACE_RE.replace_all(&text, " ");
    let text = NEWLINES_RE.replace_all(&text, "\n");
    text.trim().to_string()
}
