//! Heading-aware Markdown chunker.
//!
//! Converted pages are split into sections at headings up to a configured
//! level (H2 by default). A section that fits the target size becomes one
//! chunk; a larger section is packed paragraph by paragraph, with adjacent
//! chunks sharing a short word overlap. Fenced code blocks are never split.
//!
//! Chunk offsets are character offsets into the original document. The
//! spans of one section tile it from start to end; chunk text is the span
//! with surrounding whitespace trimmed.
//!
//! # Example
//!
//! ```rust,ignore
//! use sitekb_db::chunking::DocumentChunker;
//!
//! let chunks = DocumentChunker::default().chunk(markdown);
//! for chunk in chunks {
//!     println!("{} [{}..{}]", chunk.chunk_index, chunk.start_char, chunk.end_char);
//! }
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use sitekb_core::tokenizer::estimate_tokens;
use sitekb_core::{content_hash, defaults, HeadingItem, NewChunk};

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(#{1,6})[ \t]+(.+)$").unwrap());

/// Configuration for the document chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in estimated tokens.
    pub chunk_size: usize,
    /// Words from the end of one chunk repeated at the start of the next.
    pub overlap_words: usize,
    /// A trailing chunk with less new text than this (in characters) is
    /// merged into the previous chunk.
    pub min_chunk_chars: usize,
    /// Headings at this level or above start a new section.
    pub split_heading_level: usize,
    /// Section headings whose content is dropped (case-insensitive).
    pub noise_headings: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE_TOKENS,
            overlap_words: defaults::CHUNK_OVERLAP_WORDS,
            min_chunk_chars: defaults::CHUNK_MIN_CHARS,
            split_heading_level: defaults::CHUNK_SPLIT_HEADING_LEVEL,
            noise_headings: defaults::NOISE_HEADINGS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

impl ChunkerConfig {
    pub fn with_chunk_size(mut self, tokens: usize) -> Self {
        self.chunk_size = tokens.max(1);
        self
    }

    pub fn with_overlap_words(mut self, words: usize) -> Self {
        self.overlap_words = words;
        self
    }

    pub fn with_min_chunk_chars(mut self, chars: usize) -> Self {
        self.min_chunk_chars = chars;
        self
    }

    pub fn with_split_heading_level(mut self, level: usize) -> Self {
        self.split_heading_level = level.clamp(1, 6);
        self
    }

    pub fn with_noise_headings(mut self, headings: Vec<String>) -> Self {
        self.noise_headings = headings;
        self
    }
}

/// A chunk produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    pub content: String,
    pub chunk_index: usize,
    /// Character offset of the span start in the source document.
    pub start_char: usize,
    /// Character offset one past the span end.
    pub end_char: usize,
    pub heading: Option<String>,
    pub heading_hierarchy: Vec<HeadingItem>,
    pub token_count: usize,
}

impl DocumentChunk {
    /// Convert into a storable chunk without an embedding.
    pub fn into_new_chunk(self) -> NewChunk {
        NewChunk {
            content_hash: content_hash(&self.content),
            content: self.content,
            chunk_index: self.chunk_index as i32,
            start_char: self.start_char as i32,
            end_char: self.end_char as i32,
            heading: self.heading,
            heading_hierarchy: self.heading_hierarchy,
            token_count: self.token_count as i32,
            embedding: None,
            embedding_model: None,
        }
    }
}

#[derive(Debug)]
struct Section {
    start: usize,
    end: usize,
    heading: Option<String>,
    hierarchy: Vec<HeadingItem>,
}

/// Splits Markdown into retrieval chunks. Deterministic for a given config.
#[derive(Debug, Clone, Default)]
pub struct DocumentChunker {
    config: ChunkerConfig,
}

impl DocumentChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split a Markdown document into ordered chunks.
    pub fn chunk(&self, markdown: &str) -> Vec<DocumentChunk> {
        let fences = fence_ranges(markdown);
        let mut chunks: Vec<DocumentChunk> = Vec::new();

        for section in self.split_sections(markdown, &fences) {
            if self.is_noise(section.heading.as_deref()) {
                continue;
            }
            for (start, end) in self.pack_section(markdown, &section, &fences) {
                let content = markdown[start..end].trim().to_string();
                if content.is_empty() {
                    continue;
                }
                chunks.push(DocumentChunk {
                    chunk_index: chunks.len(),
                    start_char: char_offset(markdown, start),
                    end_char: char_offset(markdown, end),
                    token_count: estimate_tokens(&content),
                    content,
                    heading: section.heading.clone(),
                    heading_hierarchy: section.hierarchy.clone(),
                });
            }
        }
        chunks
    }

    fn fits(&self, text: &str) -> bool {
        estimate_tokens(text) <= self.config.chunk_size
    }

    fn is_noise(&self, heading: Option<&str>) -> bool {
        let Some(heading) = heading else {
            return false;
        };
        self.config
            .noise_headings
            .iter()
            .any(|noise| noise.eq_ignore_ascii_case(heading))
    }

    fn split_sections(&self, doc: &str, fences: &[(usize, usize)]) -> Vec<Section> {
        let max_level = self.config.split_heading_level.clamp(1, 6);
        let boundaries: Vec<(usize, usize, String)> = HEADING_RE
            .captures_iter(doc)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                let level = cap.get(1)?.as_str().len();
                if level > max_level || in_ranges(fences, whole.start()) {
                    return None;
                }
                let text = cap.get(2)?.as_str().trim().trim_end_matches('#').trim();
                if text.is_empty() {
                    return None;
                }
                Some((whole.start(), level, text.to_string()))
            })
            .collect();

        let mut sections = Vec::new();
        let first = boundaries.first().map(|b| b.0).unwrap_or(doc.len());
        if !doc[..first].trim().is_empty() {
            sections.push(Section {
                start: 0,
                end: first,
                heading: None,
                hierarchy: Vec::new(),
            });
        }

        let mut stack: Vec<HeadingItem> = Vec::new();
        for (i, (start, level, text)) in boundaries.iter().enumerate() {
            let end = boundaries.get(i + 1).map(|b| b.0).unwrap_or(doc.len());
            while stack.last().is_some_and(|h| h.level as usize >= *level) {
                stack.pop();
            }
            stack.push(HeadingItem {
                level: *level as i32,
                text: text.clone(),
            });
            sections.push(Section {
                start: *start,
                end,
                heading: Some(text.clone()),
                hierarchy: stack.clone(),
            });
        }
        sections
    }

    /// Byte spans of the chunks for one section.
    fn pack_section(
        &self,
        doc: &str,
        section: &Section,
        fences: &[(usize, usize)],
    ) -> Vec<(usize, usize)> {
        let text = &doc[section.start..section.end];
        if text.trim().is_empty() {
            return Vec::new();
        }
        if self.fits(text) {
            return vec![(section.start, section.end)];
        }

        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut buf_start = section.start;
        let mut new_start = section.start;
        let mut buf_end = section.start;

        for (para_start, para_end) in paragraph_ranges(doc, section.start, section.end, fences) {
            if buf_end > new_start && !self.fits(&doc[buf_start..para_end]) {
                spans.push((buf_start, buf_end));
                let overlap = self.overlap_start(doc, buf_start, buf_end);
                buf_start = if self.fits(&doc[overlap..para_end]) {
                    overlap
                } else {
                    para_start
                };
                new_start = para_start;
            }
            buf_end = para_end;
        }

        if buf_end > new_start {
            let new_chars = doc[new_start..buf_end].trim().chars().count();
            match spans.last_mut() {
                Some(last) if new_chars < self.config.min_chunk_chars => last.1 = buf_end,
                _ => spans.push((buf_start, buf_end)),
            }
        }
        spans
    }

    /// Byte offset where the overlap carried out of `[start, end)` begins.
    fn overlap_start(&self, doc: &str, start: usize, end: usize) -> usize {
        let n = self.config.overlap_words;
        if n == 0 {
            return end;
        }
        let mut word_starts = Vec::new();
        let mut prev_ws = true;
        for (i, c) in doc[start..end].char_indices() {
            let ws = c.is_whitespace();
            if !ws && prev_ws {
                word_starts.push(start + i);
            }
            prev_ws = ws;
        }
        if word_starts.len() >= n {
            word_starts[word_starts.len() - n]
        } else {
            start
        }
    }
}

/// Byte ranges of fenced code blocks, from the opening fence line to the end
/// of the closing fence marker. An unclosed fence runs to the end.
/// Backtick and tilde fences are both recognized; a block closes only on a
/// run of its own marker at least as long as the opening one.
fn fence_ranges(doc: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut open: Option<(usize, char, usize)> = None;
    let mut offset = 0;
    for line in doc.split_inclusive('\n') {
        if let Some((marker, len)) = fence_marker(line) {
            match open {
                Some((start, open_marker, open_len)) if marker == open_marker && len >= open_len => {
                    ranges.push((start, offset + line.trim_end().len()));
                    open = None;
                }
                Some(_) => {}
                None => open = Some((offset, marker, len)),
            }
        }
        offset += line.len();
    }
    if let Some((start, _, _)) = open {
        ranges.push((start, doc.len()));
    }
    ranges
}

/// The fence character and run length when `line` opens or closes a fence.
fn fence_marker(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = trimmed.chars().take_while(|c| *c == marker).count();
    (len >= 3).then_some((marker, len))
}

fn in_ranges(ranges: &[(usize, usize)], pos: usize) -> bool {
    ranges.iter().any(|&(start, end)| pos >= start && pos < end)
}

/// Paragraph spans tiling `[start, end)`, cut after each blank line outside
/// code fences. A heading line stays attached to the paragraph after it.
fn paragraph_ranges(
    doc: &str,
    start: usize,
    end: usize,
    fences: &[(usize, usize)],
) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut para_start = start;
    for (i, _) in doc[start..end].match_indices("\n\n") {
        let pos = start + i;
        if in_ranges(fences, pos) {
            continue;
        }
        let para = doc[para_start..pos].trim();
        if para.starts_with('#') && !para.contains('\n') {
            continue;
        }
        ranges.push((para_start, pos + 2));
        para_start = pos + 2;
    }
    if para_start < end {
        ranges.push((para_start, end));
    }
    ranges
}

fn char_offset(doc: &str, byte: usize) -> usize {
    doc[..byte].chars().count()
}
