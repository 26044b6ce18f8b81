//! Visible-text extraction from fetched HTML pages.

use scraper::{Html, Node};

const SKIPPED_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "head", "template"];

/// Reduce an HTML document to the text a reader would see: script, style
/// and head content dropped, whitespace collapsed to single spaces.
pub fn extract_visible_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut out = String::new();
    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(element) => SKIPPED_ELEMENTS.contains(&element.name()),
            _ => false,
        });
        if hidden {
            continue;
        }

        out.push_str(&text.text);
        out.push(' ');
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cap extracted text at `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    text.chars().take(max_chars).collect()
}
