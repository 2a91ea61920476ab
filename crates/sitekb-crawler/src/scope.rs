//! URL normalization and crawl scope.
//!
//! The visited set and the document `url_hash` are both keyed by
//! [`normalize_url`], so two spellings of the same page collapse to one.

use regex::Regex;
use tracing::warn;
use url::Url;

/// Extensions that never hold crawlable HTML.
const BINARY_EXTENSIONS: &[&str] = &[
    "7z", "avi", "bmp", "css", "dmg", "doc", "docx", "eot", "exe", "gif", "gz", "ico", "iso",
    "jpeg", "jpg", "js", "mov", "mp3", "mp4", "otf", "pdf", "png", "ppt", "pptx", "rar", "svg",
    "tar", "tgz", "ttf", "wav", "webm", "webp", "woff", "woff2", "xls", "xlsx", "zip",
];

/// Href prefixes that are not page links.
const SKIPPED_HREF_PREFIXES: &[&str] = &["#", "javascript:", "mailto:", "tel:", "data:"];

/// Normalize a URL for deduplication.
///
/// Strips the fragment and a trailing slash (except on the root path). Host
/// lowercasing and default-port removal come from `url` itself.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }
    normalized
}

/// Whether a raw `href` attribute can point at another page.
pub fn is_followable_href(href: &str) -> bool {
    let href = href.trim();
    if href.is_empty() {
        return false;
    }
    let lower = href.to_ascii_lowercase();
    !SKIPPED_HREF_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Whether the URL path ends in an extension that is never HTML.
pub fn has_binary_extension(url: &Url) -> bool {
    let Some(last) = url.path_segments().and_then(|mut s| s.next_back()) else {
        return false;
    };
    match last.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Convert a glob-like pattern to an anchored regex.
///
/// `**` matches across path separators, `*` within one segment, `?` one character.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).ok()
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| {
            let compiled = glob_to_regex(p);
            if compiled.is_none() {
                warn!(subsystem = "crawler", component = "scope", pattern = %p, "Ignoring unusable crawl pattern");
            }
            compiled
        })
        .collect()
}

/// Determines which discovered URLs a recursive crawl may follow.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    host: String,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl CrawlScope {
    pub fn new(base_url: &Url, include: &[String], exclude: &[String]) -> Self {
        Self {
            host: base_url.host_str().unwrap_or_default().to_ascii_lowercase(),
            include: compile_patterns(include),
            exclude: compile_patterns(exclude),
        }
    }

    /// Whether `url` is an in-scope page.
    ///
    /// Patterns that start with a scheme are matched against the whole URL,
    /// all others against the path.
    pub fn allows(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if url.host_str().unwrap_or_default() != self.host {
            return false;
        }
        if has_binary_extension(url) {
            return false;
        }

        let path = url.path();
        let full = url.as_str();
        let matches = |re: &Regex| {
            if re.as_str().starts_with("^http") {
                re.is_match(full)
            } else {
                re.is_match(path)
            }
        };

        if self.exclude.iter().any(matches) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(matches)
    }
}
