//! Built-in adapters for documentation platforms with a known page layout.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use super::{breadcrumb_items, extract_content, first_match, page_title, ExtractedPage};

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().map(|s| Selector::parse(s).unwrap()).collect()
}

static DOCUSAURUS_CONTENT: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&["article .markdown", "article", ".markdown", "main"]));
static DOCUSAURUS_REMOVE: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        ".theme-doc-footer",
        ".pagination-nav",
        ".theme-doc-toc-mobile",
        ".hash-link",
        "nav",
        "script",
        "style",
    ])
});
static DOCUSAURUS_BREADCRUMB: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".breadcrumbs__link").unwrap());

static RTD_CONTENT: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[r#"[role="main"]"#, ".document", ".rst-content", "main"])
});
static RTD_REMOVE: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&[".headerlink", ".rst-footer-buttons", "footer", "script", "style"]));
static RTD_BREADCRUMB: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".wy-breadcrumbs li, nav[aria-label=\"breadcrumbs\"] li").unwrap());

/// Hand-written adapters, registered by source name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeAdapter {
    /// Docusaurus sites: `article .markdown` content, `.breadcrumbs__link` trail.
    Docusaurus,
    /// Sphinx / Read the Docs sites: `[role=main]` content, `.wy-breadcrumbs` trail.
    ReadTheDocs,
}

impl CodeAdapter {
    pub fn name(&self) -> &'static str {
        match self {
            CodeAdapter::Docusaurus => "docusaurus",
            CodeAdapter::ReadTheDocs => "readthedocs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "docusaurus" => Some(CodeAdapter::Docusaurus),
            "readthedocs" | "sphinx" => Some(CodeAdapter::ReadTheDocs),
            _ => None,
        }
    }

    pub(crate) fn extract(&self, doc: &Html, url: &Url) -> ExtractedPage {
        match self {
            CodeAdapter::Docusaurus => {
                let content = first_match(doc, &DOCUSAURUS_CONTENT);
                let (html, text, links) = extract_content(doc, url, content, &DOCUSAURUS_REMOVE);
                ExtractedPage {
                    title: page_title(doc, None),
                    html,
                    text,
                    links,
                    breadcrumb: breadcrumb_items(doc, &DOCUSAURUS_BREADCRUMB),
                }
            }
            CodeAdapter::ReadTheDocs => {
                let content = first_match(doc, &RTD_CONTENT);
                let (html, text, links) = extract_content(doc, url, content, &RTD_REMOVE);
                // The trail ends with "View page source" / "Edit on GitHub" items.
                let breadcrumb = breadcrumb_items(doc, &RTD_BREADCRUMB)
                    .into_iter()
                    .map(|item| item.trim_end_matches('»').trim().to_string())
                    .filter(|item| {
                        !item.is_empty()
                            && !item.starts_with("View page source")
                            && !item.starts_with("Edit on")
                    })
                    .collect();
                ExtractedPage {
                    title: page_title(doc, None).map(|t| t.trim_end_matches('¶').trim().to_string()),
                    html,
                    text,
                    links,
                    breadcrumb,
                }
            }
        }
    }
}
