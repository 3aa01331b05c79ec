use std::sync::LazyLock;

use ego_tree::{NodeId, NodeRef};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;

use super::PARAGRAPH_DELIMITER;

/// Below this many characters of speakable text a page is considered unusable.
pub const MIN_CONTENT_CHARS: usize = 200;

const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form",
    "button", "svg",
];

const SPEAKABLE_TAGS: &[&str] = &[
    "h2", "h3", "h4", "h5", "h6", "p", "td", "pre", "li", "figcaption", "blockquote", "section",
];

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

// Elements whose text must not run into the next element's.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "figure",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre", "section", "table",
    "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
];

const MEDIA_TAGS: &[&str] = &["img", "figure", "iframe", "video"];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const MEDIA_STYLE: &str = "max-width:100%;height:auto;";

const PRESENTATION_CSS: &str = "img,figure,iframe,video{max-width:100%;height:auto;}\
figure{margin:0;}pre{overflow-x:auto;white-space:pre-wrap;}table{display:block;overflow-x:auto;}";

// Paragraphs longer than this are real prose even if they mention JavaScript.
const MARKER_PARAGRAPH_CHARS: usize = 200;

static JS_REQUIRED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(enable|turn on|activate|allow) (your )?javascript|javascript (is|must be) (required|disabled|enabled|turned off)|requires javascript",
    )
    .expect("valid javascript marker pattern")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("extracted text too short ({chars} chars, need {min})")]
    TooShort { chars: usize, min: usize },

    #[error("page requires JavaScript to show its content")]
    JavaScriptRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent {
    /// Cleaned display document.
    pub markup: String,
    /// Paragraph texts joined by [`PARAGRAPH_DELIMITER`].
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    min_chars: usize,
}

impl ContentNormalizer {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    pub fn normalize(&self, html: &str) -> Result<NormalizedContent, ContentError> {
        let document = Html::parse_document(html);
        let body = main_body(&document);
        let skipped = title_heading(body);

        let mut paragraphs = Vec::new();
        collect_speakable(body, skipped, &mut paragraphs);

        if paragraphs
            .iter()
            .any(|p| p.chars().count() < MARKER_PARAGRAPH_CHARS && JS_REQUIRED.is_match(p))
        {
            return Err(ContentError::JavaScriptRequired);
        }

        let chars: usize = paragraphs.iter().map(|p| p.chars().count()).sum();
        if chars < self.min_chars {
            tracing::debug!("Extracted content too short ({} chars)", chars);
            return Err(ContentError::TooShort {
                chars,
                min: self.min_chars,
            });
        }

        let mut markup = String::with_capacity(html.len() / 2);
        markup.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>");
        markup.push_str(PRESENTATION_CSS);
        markup.push_str("</style></head><body>");
        for child in body.children() {
            write_node(child, skipped, &mut markup);
        }
        markup.push_str("</body></html>");

        Ok(NormalizedContent {
            markup,
            text: paragraphs.join(PARAGRAPH_DELIMITER),
        })
    }
}

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new(MIN_CONTENT_CHARS)
    }
}

fn is_boilerplate(element: ElementRef<'_>) -> bool {
    let value = element.value();
    BOILERPLATE_TAGS.contains(&value.name())
        || value.attr("hidden").is_some()
        || value.attr("aria-hidden") == Some("true")
}

fn inside_boilerplate(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(is_boilerplate)
}

fn is_speakable(element: ElementRef<'_>) -> bool {
    SPEAKABLE_TAGS.contains(&element.value().name())
}

/// Length of text held directly in `<p>` children, the usual signal of an article body.
fn paragraph_score(element: ElementRef<'_>) -> usize {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "p")
        .map(|p| p.text().map(|t| t.trim().len()).sum::<usize>())
        .sum()
}

fn best_match<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter(|el| !inside_boilerplate(*el))
        .max_by_key(|el| el.text().map(|t| t.trim().len()).sum::<usize>())
}

fn main_body(document: &Html) -> ElementRef<'_> {
    for selector in ["article", "main", "[role=main]"] {
        if let Some(found) = best_match(document, selector) {
            return found;
        }
    }

    if let Ok(containers) = Selector::parse("div, section, td") {
        let best = document
            .select(&containers)
            .filter(|el| !inside_boilerplate(*el))
            .map(|el| (paragraph_score(el), el))
            .filter(|(score, _)| *score > 0)
            .max_by_key(|(score, _)| *score);
        if let Some((_, el)) = best {
            return el;
        }
    }

    Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element())
}

/// The heading that duplicates the article title: the first h1-h6 in document
/// order, ignoring boilerplate.
fn title_heading(body: ElementRef<'_>) -> Option<NodeId> {
    body.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|element| HEADING_TAGS.contains(&element.value().name()))
        .find(|element| !inside_boilerplate(*element))
        .map(|element| element.id())
}

fn collect_speakable(element: ElementRef<'_>, skipped: Option<NodeId>, out: &mut Vec<String>) {
    for child in element.children().filter_map(ElementRef::wrap) {
        if Some(child.id()) == skipped || is_boilerplate(child) {
            continue;
        }

        let nested = child
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .any(is_speakable);

        if is_speakable(child) && !nested {
            let mut raw = String::new();
            visible_text(*child, &mut raw);
            let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.chars().count() > 1 {
                out.push(text);
            }
        } else {
            collect_speakable(child, skipped, out);
        }
    }
}

fn visible_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => {
            out.push_str(text);
        }
        Node::Element(element) => {
            if ElementRef::wrap(node).is_some_and(is_boilerplate) {
                return;
            }
            for child in node.children() {
                visible_text(child, out);
            }
            if BLOCK_TAGS.contains(&element.name()) {
                out.push(' ');
            }
        }
        _ => {}
    }
}

fn write_node(node: NodeRef<'_, Node>, skipped: Option<NodeId>, out: &mut String) {
    match node.value() {
        Node::Text(text) => escape_into(text, false, out),
        Node::Element(element) => {
            if Some(node.id()) == skipped
                || ElementRef::wrap(node).is_some_and(is_boilerplate)
            {
                return;
            }

            let name = element.name();
            let is_media = MEDIA_TAGS.contains(&name);
            out.push('<');
            out.push_str(name);
            for (attr, value) in element.attrs() {
                if attr.starts_with("on") || (is_media && matches!(attr, "style" | "width" | "height"))
                {
                    continue;
                }
                out.push(' ');
                out.push_str(attr);
                out.push_str("=\"");
                escape_into(value, true, out);
                out.push('"');
            }
            if is_media {
                out.push_str(" style=\"");
                out.push_str(MEDIA_STYLE);
                out.push('"');
            }
            out.push('>');

            if VOID_TAGS.contains(&name) {
                return;
            }
            for child in node.children() {
                write_node(child, skipped, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        _ => {}
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
