//! Parsed page with non-content elements removed.

use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

/// Elements that never carry article content.
const NOISE: &str = "script, style, noscript, template, nav, header, footer, aside, \
                     .sidebar, .advertisement, .ad";

pub struct Document {
    html: Html,
    base: Url,
    page: Url,
}

impl Document {
    /// Parse `markup` without its [`NOISE`] elements. Relative URLs resolve
    /// against `base`.
    pub fn parse(markup: &str, base: Url) -> Self {
        Self {
            html: strip_noise(Html::parse_document(markup)),
            page: base.clone(),
            base,
        }
    }

    /// The URL the page was requested as, when a redirect made it differ
    /// from the base.
    pub fn with_page_url(mut self, page: Url) -> Self {
        self.page = page;
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn page_url(&self) -> &Url {
        &self.page
    }

    pub fn select_first(&self, css: &str) -> Option<ElementRef<'_>> {
        let sel = selector(css)?;
        self.html.select(&sel).next()
    }

    pub fn select_all(&self, css: &str) -> Vec<ElementRef<'_>> {
        match selector(css) {
            Some(sel) => self.html.select(&sel).collect(),
            None => Vec::new(),
        }
    }

    /// Trimmed `content` of the first `<meta {attr}="{value}">` that has one.
    pub fn meta(&self, attr: &str, value: &str) -> Option<String> {
        self.meta_all(attr, value).into_iter().next()
    }

    /// Trimmed, non-empty `content` of every `<meta {attr}="{value}">`.
    pub fn meta_all(&self, attr: &str, value: &str) -> Vec<String> {
        self.select_all(&format!(r#"meta[{attr}="{value}"]"#))
            .into_iter()
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn body(&self) -> Option<ElementRef<'_>> {
        self.select_first("body")
    }

    /// Text of the whole document, one trimmed text node per line.
    pub fn text(&self) -> String {
        block_text(self.html.root_element())
    }

    /// Absolute form of `href` relative to the page URL.
    pub fn resolve(&self, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        self.base.join(href).ok()
    }
}

/// Trimmed non-empty text nodes under `el`, joined by newlines.
pub fn block_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text under `el` with runs of whitespace collapsed to single spaces.
pub fn inline_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Detached nodes stay in the arena and `Html::select` still visits them, so
/// the pruned tree is serialized and parsed again.
fn strip_noise(mut html: Html) -> Html {
    let Some(noise) = selector(NOISE) else {
        return html;
    };
    let ids: Vec<_> = html.select(&noise).map(|el| el.id()).collect();
    if ids.is_empty() {
        return html;
    }
    for id in ids {
        if let Some(mut node) = html.tree.get_mut(id) {
            node.detach();
        }
    }
    Html::parse_document(&html.root_element().html())
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css)
        .inspect_err(|e| warn!(selector = css, error = %e, "invalid selector"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(markup: &str) -> Document {
        Document::parse(markup, Url::parse("https://news.example.com/world/story.html").unwrap())
    }

    #[test]
    fn strips_noise_elements() {
        let d = doc(r#"<html><head><script>var x = 1;</script><style>p{}</style></head>
            <body><nav>Menu</nav><header>Masthead</header>
            <p>Kept paragraph</p>
            <div class="sidebar">Trending</div><div class="ad">Buy now</div>
            <aside>Related</aside><footer>Copyright</footer></body></html>"#);

        let text = d.text();
        assert!(text.contains("Kept paragraph"));
        for gone in ["var x", "Menu", "Masthead", "Trending", "Buy now", "Related", "Copyright"] {
            assert!(!text.contains(gone), "{gone} should be stripped: {text}");
        }
    }

    #[test]
    fn stripped_elements_are_not_selectable() {
        let d = doc(r#"<html><body>
            <header><h1>Site Brand</h1></header>
            <nav><a href="/home">Home</a></nav>
            <aside><div class="content">Promo</div></aside>
            <footer><span class="author">Credits</span></footer>
            <div class="sidebar"><img src="/badge.png"></div>
            <p>Story</p>
        </body></html>"#);

        for css in ["h1", "a[href]", ".content", ".author", "img", "nav", "footer"] {
            assert!(d.select_first(css).is_none(), "{css} should be gone");
        }
        assert_eq!(d.select_all("p").len(), 1);
    }

    #[test]
    fn page_url_defaults_to_base() {
        let d = doc("<p></p>");
        assert_eq!(d.page_url(), d.base());

        let d = d.with_page_url(Url::parse("https://short.example/abc").unwrap());
        assert_eq!(d.page_url().as_str(), "https://short.example/abc");
        assert_eq!(d.base().host_str(), Some("news.example.com"));
    }

    #[test]
    fn meta_lookup_skips_empty_content() {
        let d = doc(r#"<head>
            <meta property="og:title" content="  ">
            <meta property="og:title" content=" Real title ">
            <meta property="article:tag" content="a"><meta property="article:tag" content="b">
        </head>"#);
        assert_eq!(d.meta("property", "og:title").as_deref(), Some("Real title"));
        assert_eq!(d.meta_all("property", "article:tag"), vec!["a", "b"]);
        assert_eq!(d.meta("name", "author"), None);
    }

    #[test]
    fn resolves_relative_urls() {
        let d = doc("<p></p>");
        assert_eq!(
            d.resolve("../img/a.png").unwrap().as_str(),
            "https://news.example.com/img/a.png"
        );
        assert_eq!(d.resolve("//cdn.example.com/x").unwrap().as_str(), "https://cdn.example.com/x");
        assert!(d.resolve("  ").is_none());
    }

    #[test]
    fn text_helpers() {
        let d = doc("<div id=x><p> One </p>\n<p>Two\n   words</p></div>");
        let el = d.select_first("#x").unwrap();
        assert_eq!(block_text(el), "One\nTwo\n   words");
        assert_eq!(inline_text(el), "One Two words");
    }
}
