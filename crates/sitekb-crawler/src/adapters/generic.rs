//! Generic fallback adapter for arbitrary HTML pages.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use super::{breadcrumb_items, extract_content, first_match, page_title, ExtractedPage};

static CONTENT: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["main", "article", r#"[role="main"]"#, ".content", "body"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

static CHROME: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "nav",
        "header",
        "footer",
        "aside",
        "script",
        "style",
        "noscript",
        ".sidebar",
        ".nav",
        r#"[role="navigation"]"#,
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect()
});

static BREADCRUMB: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"nav[aria-label="breadcrumb"] li, nav[aria-label="Breadcrumb"] li, .breadcrumb li, .breadcrumbs li"#,
    )
    .unwrap()
});

/// Uses `<main>`, `<article>`, then `<body>`, with navigation chrome removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenericAdapter;

impl GenericAdapter {
    pub const NAME: &'static str = "generic";

    pub(crate) fn extract(&self, doc: &Html, url: &Url) -> ExtractedPage {
        let content = first_match(doc, &CONTENT);
        let (html, text, links) = extract_content(doc, url, content, &CHROME);
        ExtractedPage {
            title: page_title(doc, None),
            html,
            text,
            links,
            breadcrumb: breadcrumb_items(doc, &BREADCRUMB),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> ExtractedPage {
        let url = Url::parse("https://site.example.com/page").unwrap();
        GenericAdapter.extract(&Html::parse_document(html), &url)
    }

    #[test]
    fn test_prefers_main() {
        let page = extract(
            "<html><body><div>Outside</div><main><h1>Title</h1><p>Inside</p></main></body></html>",
        );
        assert_eq!(page.text, "Title Inside");
        assert_eq!(page.title.as_deref(), Some("Title"));
    }

    #[test]
    fn test_body_fallback_strips_chrome() {
        let page = extract(
            "<html><body><header>Top bar</header><nav>Menu</nav><p>Body text</p>\
             <script>var x;</script><footer>Copyright</footer></body></html>",
        );
        assert_eq!(page.text, "Body text");
    }

    #[test]
    fn test_breadcrumb_list() {
        let page = extract(
            r#"<html><body><nav aria-label="breadcrumb"><ol><li><a href="/">Home</a></li>
               <li>Guides</li></ol></nav><main><p>x</p></main></body></html>"#,
        );
        assert_eq!(page.breadcrumb, vec!["Home", "Guides"]);
    }

    #[test]
    fn test_links_come_from_whole_page() {
        let page = extract(
            r#"<html><body><nav><a href="/a">A</a></nav><main><a href="b">B</a></main></body></html>"#,
        );
        assert_eq!(
            page.links,
            vec![
                "https://site.example.com/a".to_string(),
                "https://site.example.com/b".to_string()
            ]
        );
    }
}
