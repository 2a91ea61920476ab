//! Content change detection.
//!
//! A page is looked up by url hash in the building version first, then in
//! the source's active version. The stored content hash decides whether the
//! page is new, updated, or unchanged.

use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use sitekb_core::{content_hash, url_hash, DocumentRepository, Result};

/// The versions a build reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionContext {
    pub source_id: Uuid,
    /// Version being built; all writes go here.
    pub building: Uuid,
    /// Currently served version, if the source was published before.
    pub active: Option<Uuid>,
}

/// Classification of one fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageChange {
    /// No stored document for this URL.
    New,
    /// A stored document exists with a different content hash.
    Updated { document_id: Uuid },
    /// Hash matches a document already in the building version.
    Unchanged { document_id: Uuid },
    /// Hash matches a document that only exists in the active version; it
    /// has to be carried forward into the building version.
    CarryForward { document_id: Uuid },
}

/// Result of diffing one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDiff {
    pub url_hash: String,
    pub content_hash: String,
    pub change: PageChange,
}

impl PageDiff {
    pub fn is_new(&self) -> bool {
        matches!(self.change, PageChange::New)
    }

    pub fn is_updated(&self) -> bool {
        matches!(self.change, PageChange::Updated { .. })
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(
            self.change,
            PageChange::Unchanged { .. } | PageChange::CarryForward { .. }
        )
    }
}

/// Compares fetched content with stored content hashes.
#[derive(Clone)]
pub struct ContentDiffer {
    documents: Arc<dyn DocumentRepository>,
}

impl ContentDiffer {
    pub fn new(documents: Arc<dyn DocumentRepository>) -> Self {
        Self { documents }
    }

    /// Classify a page given its normalized URL and extracted text.
    pub async fn diff(&self, ctx: &VersionContext, url: &str, text: &str) -> Result<PageDiff> {
        let url_hash = url_hash(url);
        let content_hash = content_hash(text);

        let change = match self.documents.find_content_hash(ctx.building, &url_hash).await? {
            Some((document_id, stored)) if stored == content_hash => {
                PageChange::Unchanged { document_id }
            }
            Some((document_id, _)) => PageChange::Updated { document_id },
            None => match ctx.active {
                Some(active) => match self.documents.find_content_hash(active, &url_hash).await? {
                    Some((document_id, stored)) if stored == content_hash => {
                        PageChange::CarryForward { document_id }
                    }
                    Some((document_id, _)) => PageChange::Updated { document_id },
                    None => PageChange::New,
                },
                None => PageChange::New,
            },
        };

        trace!(
            subsystem = "jobs",
            component = "differ",
            url = %url,
            change = ?change,
            "Classified page"
        );

        Ok(PageDiff {
            url_hash,
            content_hash,
            change,
        })
    }
}
