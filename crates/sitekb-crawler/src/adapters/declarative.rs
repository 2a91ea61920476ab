//! Declarative adapters loaded from YAML.
//!
//! ```yaml
//! name: acme-help
//! content_selector: "#article-body"
//! title_selector: "h1.article-title"
//! remove_selectors: [".feedback", ".related"]
//! breadcrumb_selector: ".breadcrumbs a"
//! link_selector: ".sidebar, #article-body"
//! ```

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use sitekb_core::{Error, Result};

use super::{
    breadcrumb_items, extract_links, first_match, fragment_text, inner_html_without, page_title,
    ExtractedPage,
};

/// On-disk form of a declarative adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarativeAdapterSpec {
    /// Source name this adapter applies to.
    pub name: String,
    pub content_selector: String,
    #[serde(default)]
    pub title_selector: Option<String>,
    #[serde(default)]
    pub remove_selectors: Vec<String>,
    #[serde(default)]
    pub breadcrumb_selector: Option<String>,
    /// Restricts link discovery to matching containers.
    #[serde(default)]
    pub link_selector: Option<String>,
}

/// A declarative adapter with its selectors compiled.
#[derive(Debug, Clone)]
pub struct DeclarativeAdapter {
    name: String,
    content: Selector,
    title: Option<Selector>,
    remove: Vec<Selector>,
    breadcrumb: Option<Selector>,
    links: Option<Selector>,
}

fn compile(adapter: &str, selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|_| Error::Config(format!("adapter {adapter}: invalid selector {selector:?}")))
}

impl DeclarativeAdapter {
    pub fn from_spec(spec: &DeclarativeAdapterSpec) -> Result<Self> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(Error::Config("declarative adapter without a name".to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            content: compile(name, &spec.content_selector)?,
            title: spec
                .title_selector
                .as_deref()
                .map(|s| compile(name, s))
                .transpose()?,
            remove: spec
                .remove_selectors
                .iter()
                .map(|s| compile(name, s))
                .collect::<Result<_>>()?,
            breadcrumb: spec
                .breadcrumb_selector
                .as_deref()
                .map(|s| compile(name, s))
                .transpose()?,
            links: spec
                .link_selector
                .as_deref()
                .map(|s| compile(name, s))
                .transpose()?,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let spec: DeclarativeAdapterSpec = serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid adapter file: {e}")))?;
        Self::from_spec(&spec)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn extract(&self, doc: &Html, url: &Url) -> ExtractedPage {
        let html = first_match(doc, std::slice::from_ref(&self.content))
            .map(|el| inner_html_without(el, &self.remove))
            .unwrap_or_default();
        ExtractedPage {
            title: page_title(doc, self.title.as_ref()),
            text: fragment_text(&html),
            html,
            links: extract_links(doc, self.links.as_ref(), url),
            breadcrumb: self
                .breadcrumb
                .as_ref()
                .map(|sel| breadcrumb_items(doc, sel))
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r##"
name: acme-help
content_selector: "#article-body"
title_selector: "h1.article-title"
remove_selectors: [".feedback"]
breadcrumb_selector: ".breadcrumbs a"
link_selector: ".sidebar"
"##;

    const PAGE: &str = r##"<html><body>
        <div class="breadcrumbs"><a href="/">Help</a><a href="/billing">Billing</a></div>
        <h1>Site name</h1>
        <div class="sidebar"><a href="/billing/refunds">Refunds</a></div>
        <h1 class="article-title">Change your plan</h1>
        <div id="article-body"><p>Open settings.</p><div class="feedback">Was this helpful?</div></div>
        <a href="/careers">Careers</a>
    </body></html>"##;

    #[test]
    fn test_declarative_extraction() {
        let adapter = DeclarativeAdapter::from_yaml(YAML).unwrap();
        let url = Url::parse("https://help.acme.test/billing/plans").unwrap();
        let page = adapter.extract(&Html::parse_document(PAGE), &url);

        assert_eq!(adapter.name(), "acme-help");
        assert_eq!(page.title.as_deref(), Some("Change your plan"));
        assert_eq!(page.text, "Open settings.");
        assert_eq!(page.breadcrumb, vec!["Help", "Billing"]);
        assert_eq!(page.links, vec!["https://help.acme.test/billing/refunds".to_string()]);
    }

    #[test]
    fn test_missing_content_gives_empty_page_body() {
        let adapter = DeclarativeAdapter::from_yaml(YAML).unwrap();
        let url = Url::parse("https://help.acme.test/").unwrap();
        let page = adapter.extract(&Html::parse_document("<html><body><p>x</p></body></html>"), &url);
        assert!(page.html.is_empty());
        assert!(page.text.is_empty());
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let err = DeclarativeAdapter::from_yaml("name: bad\ncontent_selector: \"div[\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_name_rejected() {
        let err = DeclarativeAdapter::from_yaml("name: \"  \"\ncontent_selector: main\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
