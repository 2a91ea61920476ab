//! HTML to Markdown conversion backed by `htmd`.

use htmd::options::{CodeBlockStyle, HeadingStyle, Options};
use tracing::trace;

use sitekb_core::{Converter, Error, Result};

/// Tags dropped with their content.
const DEFAULT_SKIP_TAGS: &[&str] = &["script", "style", "nav", "iframe", "noscript", "svg"];

/// `htmd` converter followed by whitespace cleanup.
#[derive(Debug, Clone)]
pub struct HtmdConverter {
    skip_tags: Vec<String>,
}

impl Default for HtmdConverter {
    fn default() -> Self {
        Self {
            skip_tags: DEFAULT_SKIP_TAGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HtmdConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop these tags (and their content) in addition to the defaults.
    pub fn with_skip_tags(mut self, tags: &[&str]) -> Self {
        for tag in tags {
            if !self.skip_tags.iter().any(|t| t == tag) {
                self.skip_tags.push(tag.to_string());
            }
        }
        self
    }
}

impl Converter for HtmdConverter {
    fn convert(&self, html: &str) -> Result<String> {
        // The chunker splits on ATX (`##`) headings only.
        let converter = htmd::HtmlToMarkdown::builder()
            .options(Options {
                heading_style: HeadingStyle::Atx,
                code_block_style: CodeBlockStyle::Fenced,
                ..Default::default()
            })
            .skip_tags(self.skip_tags.iter().map(String::as_str).collect())
            .build();
        let raw = converter
            .convert(html)
            .map_err(|e| Error::Conversion(format!("htmd conversion failed: {e}")))?;
        trace!(
            subsystem = "crawler",
            component = "converter",
            html_len = html.len(),
            md_len = raw.len(),
            "Converted page"
        );
        Ok(cleanup(&raw))
    }
}

/// Trim trailing spaces per line and collapse runs of blank lines, leaving
/// fenced code untouched.
fn cleanup(md: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;
    for line in md.lines() {
        let marker = ["```", "~~~"]
            .into_iter()
            .find(|m| line.trim_start().starts_with(m));
        match (fence, marker) {
            (Some(open), Some(m)) if open == m => fence = None,
            (Some(_), _) => {
                lines.push(line);
                continue;
            }
            (None, Some(m)) => fence = Some(m),
            (None, None) => {}
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() && lines.last().is_some_and(|l| l.trim().is_empty()) {
            continue;
        }
        lines.push(trimmed);
    }
    lines.join("\n").trim().to_string()
}
