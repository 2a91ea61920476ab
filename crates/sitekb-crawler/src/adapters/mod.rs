//! Site adapters: per-source content extraction.
//!
//! Resolution for a source name is ordered: a code adapter registered for the
//! name, then a declarative adapter loaded from YAML, then the generic
//! fallback. The result is cached per source name.

mod code;
mod declarative;
mod generic;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use sitekb_core::Result;

use crate::scope::is_followable_href;

pub use code::CodeAdapter;
pub use declarative::{DeclarativeAdapter, DeclarativeAdapterSpec};
pub use generic::GenericAdapter;

/// Content extracted from one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    /// Main content HTML with chrome removed.
    pub html: String,
    /// Whitespace-normalized text of `html`.
    pub text: String,
    /// Absolute link targets, fragment stripped, in document order.
    pub links: Vec<String>,
    pub breadcrumb: Vec<String>,
}

/// The closed set of adapter kinds.
#[derive(Debug, Clone)]
pub enum SiteAdapter {
    Code(CodeAdapter),
    Declarative(DeclarativeAdapter),
    Generic(GenericAdapter),
}

impl SiteAdapter {
    pub fn name(&self) -> &str {
        match self {
            SiteAdapter::Code(a) => a.name(),
            SiteAdapter::Declarative(a) => a.name(),
            SiteAdapter::Generic(_) => GenericAdapter::NAME,
        }
    }

    /// Extract content, links, and breadcrumb from a fetched page.
    pub fn extract(&self, html: &str, url: &Url) -> ExtractedPage {
        let doc = Html::parse_document(html);
        match self {
            SiteAdapter::Code(a) => a.extract(&doc, url),
            SiteAdapter::Declarative(a) => a.extract(&doc, url),
            SiteAdapter::Generic(a) => a.extract(&doc, url),
        }
    }
}

/// Resolves and caches the adapter for each source name.
#[derive(Debug, Default)]
pub struct AdapterResolver {
    code: HashMap<String, CodeAdapter>,
    declarative: HashMap<String, DeclarativeAdapter>,
    cache: Mutex<HashMap<String, Arc<SiteAdapter>>>,
}

impl AdapterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver with declarative adapters from `ADAPTER_CONFIG_DIR`, if set.
    pub fn from_env() -> Result<Self> {
        let mut resolver = Self::new();
        if let Ok(dir) = std::env::var("ADAPTER_CONFIG_DIR") {
            resolver.load_declarative_dir(Path::new(&dir))?;
        }
        Ok(resolver)
    }

    /// Register a code adapter for a source name.
    pub fn register_code(&mut self, source_name: impl Into<String>, adapter: CodeAdapter) {
        self.code.insert(source_name.into(), adapter);
        self.clear_cache();
    }

    pub fn register_declarative(&mut self, adapter: DeclarativeAdapter) {
        self.declarative.insert(adapter.name().to_string(), adapter);
        self.clear_cache();
    }

    /// Load every `*.yaml` / `*.yml` file in `dir` as a declarative adapter.
    ///
    /// Returns the number of adapters loaded. A file that fails to parse
    /// fails the whole load.
    pub fn load_declarative_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            let raw = std::fs::read_to_string(&path)?;
            let adapter = DeclarativeAdapter::from_yaml(&raw)?;
            debug!(
                subsystem = "crawler",
                component = "adapters",
                adapter = adapter.name(),
                path = %path.display(),
                "Loaded declarative adapter"
            );
            self.register_declarative(adapter);
            loaded += 1;
        }

        info!(
            subsystem = "crawler",
            component = "adapters",
            dir = %dir.display(),
            count = loaded,
            "Declarative adapters loaded"
        );
        Ok(loaded)
    }

    /// Adapter for `source_name`, resolved once and cached.
    pub fn resolve(&self, source_name: Option<&str>) -> Arc<SiteAdapter> {
        let Some(name) = source_name else {
            return Arc::new(SiteAdapter::Generic(GenericAdapter));
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(adapter) = cache.get(name) {
            return Arc::clone(adapter);
        }

        let adapter = if let Some(code) = self.code.get(name) {
            SiteAdapter::Code(*code)
        } else if let Some(declarative) = self.declarative.get(name) {
            SiteAdapter::Declarative(declarative.clone())
        } else {
            SiteAdapter::Generic(GenericAdapter)
        };
        debug!(
            subsystem = "crawler",
            component = "adapters",
            source = name,
            adapter = adapter.name(),
            "Resolved site adapter"
        );

        let adapter = Arc::new(adapter);
        cache.insert(name.to_string(), Arc::clone(&adapter));
        adapter
    }

    fn clear_cache(&mut self) {
        self.cache
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

// ---------------------------------------------------------------------------
// Shared extraction helpers
// ---------------------------------------------------------------------------

/// First element matching any of `candidates`, in candidate order.
pub(crate) fn first_match<'a>(doc: &'a Html, candidates: &[Selector]) -> Option<ElementRef<'a>> {
    candidates.iter().find_map(|sel| doc.select(sel).next())
}

/// Inner HTML of `element` with every descendant matching `remove` cut out.
pub(crate) fn inner_html_without(element: ElementRef<'_>, remove: &[Selector]) -> String {
    let mut html = element.inner_html();
    for sel in remove {
        for child in element.select(sel) {
            let outer = child.html();
            if let Some(pos) = html.find(&outer) {
                html.replace_range(pos..pos + outer.len(), "");
            }
        }
    }
    html
}

/// Whitespace-normalized text content of an HTML fragment.
pub(crate) fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Page title: the first match of `preferred`, then the first `h1`, then `<title>`.
pub(crate) fn page_title(doc: &Html, preferred: Option<&Selector>) -> Option<String> {
    static H1: once_cell::sync::Lazy<Selector> =
        once_cell::sync::Lazy::new(|| Selector::parse("h1").unwrap());
    static TITLE: once_cell::sync::Lazy<Selector> =
        once_cell::sync::Lazy::new(|| Selector::parse("title").unwrap());

    preferred
        .into_iter()
        .chain([&*H1, &*TITLE])
        .filter_map(|sel| doc.select(sel).next())
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// Texts of the elements matching `selector`, empty entries dropped.
pub(crate) fn breadcrumb_items(doc: &Html, selector: &Selector) -> Vec<String> {
    doc.select(selector)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Absolute, deduplicated link targets of `a[href]` elements.
///
/// With `within`, only links inside the matching elements are returned.
pub(crate) fn extract_links(doc: &Html, within: Option<&Selector>, base_url: &Url) -> Vec<String> {
    static ANCHOR: once_cell::sync::Lazy<Selector> =
        once_cell::sync::Lazy::new(|| Selector::parse("a[href]").unwrap());

    let anchors: Vec<ElementRef<'_>> = match within {
        Some(scope) => doc
            .select(scope)
            .flat_map(|container| container.select(&ANCHOR))
            .collect(),
        None => doc.select(&ANCHOR).collect(),
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in anchors {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !is_followable_href(href) {
            continue;
        }
        if let Ok(mut resolved) = base_url.join(href.trim()) {
            resolved.set_fragment(None);
            let link = resolved.to_string();
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    }
    links
}

/// Shared extraction over a content element.
pub(crate) fn extract_content(
    doc: &Html,
    url: &Url,
    content: Option<ElementRef<'_>>,
    remove: &[Selector],
) -> (String, String, Vec<String>) {
    let html = content
        .map(|el| inner_html_without(el, remove))
        .unwrap_or_default();
    let text = fragment_text(&html);
    let links = extract_links(doc, None, url);
    (html, text, links)
}
