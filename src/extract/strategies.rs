//! Ordered per-field extraction strategies.
//!
//! Each strategy is a pure function that either finds a value or reports no
//! match. A field's cascade is a slice of strategies tried in order by
//! [`first_match`].

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::document::{Document, block_text, inline_text};

pub type Strategy<T> = fn(&Document) -> Option<T>;

pub const TITLE_FALLBACK: &str = "No title found";

/// Minimum length, in characters, of a content block worth keeping.
pub const MIN_BLOCK_CHARS: usize = 100;

pub const DESCRIPTION_CHARS: usize = 300;
pub const MAX_IMAGES: usize = 10;
pub const MAX_LINKS: usize = 50;

const TITLE_SELECTORS: &[&str] = &[
    "h1",
    ".headline",
    ".title",
    ".post-title",
    ".article-title",
    r#"[data-testid="headline"]"#,
];

const CONTENT_SELECTORS: &[&str] = &[
    "article",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".content",
    ".story-body",
    r#"[data-testid="article-body"]"#,
    ".article-body",
    ".post-body",
    ".news-content",
    "main",
];

const AUTHOR_SELECTORS: &[&str] = &[
    ".author",
    ".byline",
    r#"[rel="author"]"#,
    ".article-author",
    ".post-author",
    ".writer",
];

const DATE_PROPERTIES: &[&str] = &[
    "article:published_time",
    "article:modified_time",
    "datePublished",
];

const DATE_SELECTORS: &[&str] = &[
    "time",
    ".date",
    ".publish-date",
    ".timestamp",
    ".article-date",
    ".post-date",
    "[datetime]",
];

static BYLINE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:written\s+by|by|author)\b\s*:?\s*").expect("valid regex")
});

pub const TITLE: &[Strategy<String>] = &[og_title, title_tag, title_heading];
pub const CONTENT: &[Strategy<String>] = &[content_blocks, body_text, document_text];
pub const AUTHOR: &[Strategy<String>] = &[meta_author, byline];
pub const PUBLISH_DATE: &[Strategy<String>] = &[meta_date, time_datetime, date_text];
pub const DESCRIPTION: &[Strategy<String>] = &[meta_description, og_description, first_paragraph];

pub fn first_match<T>(doc: &Document, strategies: &[Strategy<T>]) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(doc))
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == s.len() {
        Some(s)
    } else {
        Some(trimmed.to_string())
    }
}

/// First element, in selector order, with non-empty inline text.
fn first_text(doc: &Document, selectors: &[&str]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|css| doc.select_first(css))
        .find_map(|el| non_empty(inline_text(el)))
}

pub fn og_title(doc: &Document) -> Option<String> {
    doc.meta("property", "og:title")
}

pub fn title_tag(doc: &Document) -> Option<String> {
    doc.select_first("title").and_then(|el| non_empty(inline_text(el)))
}

pub fn title_heading(doc: &Document) -> Option<String> {
    first_text(doc, TITLE_SELECTORS)
}

/// Substantial blocks of the first content container that has any.
pub fn content_blocks(doc: &Document) -> Option<String> {
    CONTENT_SELECTORS.iter().find_map(|css| {
        let blocks: Vec<String> = doc
            .select_all(css)
            .into_iter()
            .map(block_text)
            .filter(|text| text.chars().count() > MIN_BLOCK_CHARS)
            .collect();
        (!blocks.is_empty()).then(|| blocks.join("\n\n"))
    })
}

pub fn body_text(doc: &Document) -> Option<String> {
    doc.body().and_then(|body| non_empty(block_text(body)))
}

pub fn document_text(doc: &Document) -> Option<String> {
    non_empty(doc.text())
}

pub fn meta_author(doc: &Document) -> Option<String> {
    doc.meta("name", "author")
}

pub fn byline(doc: &Document) -> Option<String> {
    AUTHOR_SELECTORS
        .iter()
        .filter_map(|css| doc.select_first(css))
        .find_map(|el| non_empty(strip_byline_prefix(&inline_text(el)).to_string()))
}

/// `"By Jane Doe"` -> `"Jane Doe"`.
pub fn strip_byline_prefix(text: &str) -> &str {
    match BYLINE_PREFIX.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

pub fn meta_date(doc: &Document) -> Option<String> {
    DATE_PROPERTIES.iter().find_map(|prop| {
        doc.meta("property", prop)
            .or_else(|| doc.meta("name", prop))
            .or_else(|| doc.meta("itemprop", prop))
    })
}

pub fn time_datetime(doc: &Document) -> Option<String> {
    doc.select_all("time[datetime]")
        .into_iter()
        .filter_map(|el| el.value().attr("datetime"))
        .find_map(|dt| non_empty(dt.to_string()))
}

pub fn date_text(doc: &Document) -> Option<String> {
    first_text(doc, DATE_SELECTORS)
}

pub fn meta_description(doc: &Document) -> Option<String> {
    doc.meta("name", "description")
}

pub fn og_description(doc: &Document) -> Option<String> {
    doc.meta("property", "og:description")
}

/// First non-empty paragraph, cut to [`DESCRIPTION_CHARS`] characters and
/// marked with an ellipsis.
pub fn first_paragraph(doc: &Document) -> Option<String> {
    doc.select_all("p")
        .into_iter()
        .find_map(|p| non_empty(inline_text(p)))
        .map(|text| {
            let mut cut: String = text.chars().take(DESCRIPTION_CHARS).collect();
            cut.push_str("...");
            cut
        })
}

/// Comma-separated `keywords` meta plus every `article:tag`, deduplicated.
pub fn keywords(doc: &Document) -> BTreeSet<String> {
    let listed = doc
        .meta_all("name", "keywords")
        .into_iter()
        .flat_map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });
    listed
        .chain(doc.meta_all("property", "article:tag"))
        .collect()
}

/// `og:image` first, then every `<img src>`, absolute and deduplicated.
pub fn images(doc: &Document) -> Vec<String> {
    let og = doc.meta("property", "og:image");
    let sources = doc
        .select_all("img[src]")
        .into_iter()
        .filter_map(|img| img.value().attr("src"))
        .map(str::to_string);

    let mut images: Vec<String> = Vec::new();
    for src in og.into_iter().chain(sources) {
        if images.len() == MAX_IMAGES {
            break;
        }
        if let Some(url) = doc.resolve(&src).map(String::from)
            && !images.contains(&url)
        {
            images.push(url);
        }
    }
    images
}

/// Every `<a href>`, absolute and deduplicated, without links back to the
/// page itself under either its requested or its final URL.
pub fn links(doc: &Document) -> Vec<String> {
    let own = [
        without_fragment(doc.base().as_str()),
        without_fragment(doc.page_url().as_str()),
    ];
    let mut links: Vec<String> = Vec::new();
    for el in doc.select_all("a[href]") {
        if links.len() == MAX_LINKS {
            break;
        }
        let Some(url) = el.value().attr("href").and_then(|href| doc.resolve(href)) else {
            continue;
        };
        let url = String::from(url);
        if !own.contains(&without_fragment(&url)) && !links.contains(&url) {
            links.push(url);
        }
    }
    links
}

fn without_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(head, _)| head)
}
