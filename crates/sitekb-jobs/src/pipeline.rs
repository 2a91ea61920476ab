//! Knowledge build pipeline.
//!
//! One run crawls a source into its building version:
//!
//! 1. Create (or resume) the building version and look up the active one.
//! 2. For every crawled page, diff against stored content hashes. Unchanged
//!    pages are skipped; pages that only exist unchanged in the active
//!    version are carried forward.
//! 3. Changed pages are converted to Markdown, chunked, embedded, and stored
//!    with their chunks in one transaction.
//! 4. Progress is reported every few pages and once at the end.
//! 5. After a complete recursive crawl, documents copied from the active
//!    version whose page was not reached are deleted from the building one.
//! 6. A run that processed at least one page and was not stopped is
//!    published when the task asks for it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use sitekb_core::{
    defaults, url_hash, BuildProgress, Converter, DocumentRepository, EmbeddingBackend, Error, NewChunk,
    NewDocument, PublishResult, Result, Source, StopFlag, VersionRepository,
};
use sitekb_crawler::{
    CrawlMode, CrawlOrchestrator, CrawlRequest, CrawlSummary, CrawledPage, PageSink,
};
use sitekb_db::{ChunkerConfig, DocumentChunker};

use crate::differ::{ContentDiffer, PageChange, VersionContext};

/// Receives progress snapshots while a build runs.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report_progress(&self, progress: &BuildProgress);
}

/// Discards progress; for standalone runs.
pub struct NoProgress;

#[async_trait]
impl ProgressReporter for NoProgress {
    async fn report_progress(&self, _progress: &BuildProgress) {}
}

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Markdown shorter than this is stored as a document without chunks.
    pub min_content_chars: usize,
    /// Report progress after this many handled pages.
    pub progress_every: usize,
    pub chunker: ChunkerConfig,
    /// Recorded as `created_by` on new versions.
    pub created_by: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_content_chars: defaults::MIN_CONTENT_CHARS,
            progress_every: defaults::PROGRESS_PERSIST_EVERY,
            chunker: ChunkerConfig::default(),
            created_by: "sitekb-worker".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn with_min_content_chars(mut self, chars: usize) -> Self {
        self.min_content_chars = chars;
        self
    }

    pub fn with_progress_every(mut self, pages: usize) -> Self {
        self.progress_every = pages.max(1);
        self
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }
}

/// Per-run options taken from the task.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub auto_publish: bool,
    pub commit_message: Option<String>,
}

/// What one pipeline run did.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub source_id: Uuid,
    pub version_id: Uuid,
    pub progress: BuildProgress,
    pub crawl: CrawlSummary,
    pub chunks_written: usize,
    pub chunks_deduplicated: usize,
    /// Documents stored without chunks because their content was too short.
    pub shells: usize,
    pub carried_forward: usize,
    /// Documents removed because the crawl no longer reached their page.
    pub pruned: u64,
    /// (url, error) for pages that were fetched but could not be stored.
    pub page_errors: Vec<(String, String)>,
    pub published: Option<PublishResult>,
}

impl BuildReport {
    pub fn stopped(&self) -> bool {
        self.crawl.stopped
    }

    /// Nothing reached classification.
    pub fn is_failure(&self) -> bool {
        self.progress.processed() == 0
    }

    /// Reason recorded when the run is a failure.
    pub fn failure_reason(&self) -> String {
        let first = self
            .crawl
            .failures
            .iter()
            .chain(self.page_errors.iter())
            .next()
            .map(|(url, e)| format!(": {url}: {e}"))
            .unwrap_or_default();
        format!(
            "no pages processed ({} errors){first}",
            self.progress.errors
        )
    }

    /// Summary stored on the completed task.
    pub fn summary_json(&self) -> JsonValue {
        json!({
            "versionId": self.version_id,
            "progress": self.progress,
            "pagesFetched": self.crawl.pages_fetched,
            "pagesFailed": self.crawl.pages_failed,
            "pagesSkipped": self.crawl.pages_skipped,
            "hitPageLimit": self.crawl.hit_page_limit,
            "chunksWritten": self.chunks_written,
            "chunksDeduplicated": self.chunks_deduplicated,
            "carriedForward": self.carried_forward,
            "pruned": self.pruned,
            "published": self.published.is_some(),
            "archivedVersionId": self.published.and_then(|p| p.archived_version_id),
            "durationMs": self.crawl.duration.as_millis() as u64,
        })
    }
}

/// Crawl, diff, convert, chunk, embed, store, publish.
pub struct BuildPipeline {
    orchestrator: Arc<CrawlOrchestrator>,
    versions: Arc<dyn VersionRepository>,
    documents: Arc<dyn DocumentRepository>,
    differ: ContentDiffer,
    converter: Arc<dyn Converter>,
    chunker: DocumentChunker,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    config: PipelineConfig,
}

impl BuildPipeline {
    /// Without an embedder, chunks are stored with no vectors.
    pub fn new(
        orchestrator: Arc<CrawlOrchestrator>,
        versions: Arc<dyn VersionRepository>,
        documents: Arc<dyn DocumentRepository>,
        converter: Arc<dyn Converter>,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
    ) -> Self {
        let config = PipelineConfig::default();
        Self {
            orchestrator,
            versions,
            differ: ContentDiffer::new(documents.clone()),
            documents,
            converter,
            chunker: DocumentChunker::new(config.chunker.clone()),
            embedder,
            config,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.chunker = DocumentChunker::new(config.chunker.clone());
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one build of `source`.
    ///
    /// Repository and embedder configuration errors abort the run; every
    /// other per-page problem is counted and the crawl continues.
    pub async fn run(
        &self,
        source: &Source,
        request: &CrawlRequest,
        options: &BuildOptions,
        reporter: &dyn ProgressReporter,
        stop: &StopFlag,
    ) -> Result<BuildReport> {
        let version = self
            .versions
            .create_building_version(
                source.id,
                options.commit_message.as_deref(),
                Some(&self.config.created_by),
            )
            .await?;
        let active = self.versions.get_active(source.id).await?.map(|v| v.id);
        let ctx = VersionContext {
            source_id: source.id,
            building: version.id,
            active,
        };

        info!(
            subsystem = "jobs",
            component = "pipeline",
            source_id = %source.id,
            version_id = %version.id,
            version_number = version.version_number,
            active_version_id = ?active,
            "Starting knowledge build"
        );

        let mut sink = BuildSink::new(self, ctx, reporter);
        let crawl = self.orchestrator.crawl(request, &mut sink, stop).await?;
        reporter.report_progress(&sink.progress).await;

        let (mut report, visited) = sink.into_report(source.id, version.id, crawl);

        if report.stopped() {
            info!(
                subsystem = "jobs",
                component = "pipeline",
                version_id = %version.id,
                processed = report.progress.processed(),
                "Build stopped; version left unpublished"
            );
            return Ok(report);
        }
        if report.is_failure() {
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                version_id = %version.id,
                errors = report.progress.errors,
                "No pages processed; version left unpublished"
            );
            return Ok(report);
        }

        if matches!(request.mode, CrawlMode::Recursive) && !report.crawl.hit_page_limit {
            let keep: Vec<String> = visited.into_iter().collect();
            report.pruned = self.documents.prune_unvisited(version.id, &keep).await?;
            if report.pruned > 0 {
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    op = "prune",
                    version_id = %version.id,
                    pruned = report.pruned,
                    "Removed pages no longer reachable"
                );
            }
        }

        if options.auto_publish {
            let published = self.versions.publish(source.id).await?;
            info!(
                subsystem = "jobs",
                component = "pipeline",
                op = "publish",
                version_id = %published.version_id,
                archived_version_id = ?published.archived_version_id,
                "Published version"
            );
            report.published = Some(published);
        }

        info!(
            subsystem = "jobs",
            component = "pipeline",
            version_id = %version.id,
            new = report.progress.new,
            updated = report.progress.updated,
            skipped = report.progress.skipped,
            errors = report.progress.errors,
            chunk_count = report.chunks_written,
            duration_ms = report.crawl.duration.as_millis() as u64,
            "Knowledge build finished"
        );
        Ok(report)
    }

    async fn process_page(
        &self,
        ctx: &VersionContext,
        page: &CrawledPage,
        parent_id: Option<Uuid>,
    ) -> Result<PageOutcome> {
        let url = page.url.as_str();
        let diff = self.differ.diff(ctx, url, &page.content.text).await?;

        match diff.change {
            PageChange::Unchanged { document_id } => {
                return Ok(PageOutcome::Unchanged { document_id });
            }
            PageChange::CarryForward { document_id } => {
                let document_id = self.documents.carry_forward(document_id, ctx.building).await?;
                return Ok(PageOutcome::CarriedForward { document_id });
            }
            PageChange::New | PageChange::Updated { .. } => {}
        }

        let markdown = self.converter.convert(&page.content.html)?;
        let chunks = if markdown.chars().count() < self.config.min_content_chars {
            debug!(
                subsystem = "jobs",
                component = "pipeline",
                url = %url,
                md_chars = markdown.chars().count(),
                "Content below threshold; storing without chunks"
            );
            Vec::new()
        } else {
            self.chunk_and_embed(&markdown).await?
        };

        let document = NewDocument {
            source_id: ctx.source_id,
            source_version_id: ctx.building,
            url: url.to_string(),
            url_hash: diff.url_hash,
            title: page.content.title.clone(),
            description: None,
            content_text: Some(page.content.text.clone()),
            content_html: Some(page.content.html.clone()),
            content_md: Some(markdown),
            content_hash: diff.content_hash,
            depth: page.depth as i32,
            breadcrumb: page.content.breadcrumb.clone(),
            parent_id,
            word_count: page.content.text.split_whitespace().count() as i32,
        };
        let stored = self.documents.upsert_with_chunks(&document, &chunks).await?;

        Ok(PageOutcome::Stored {
            document_id: stored.document_id,
            is_new: matches!(diff.change, PageChange::New),
            chunks_inserted: stored.chunks_inserted,
            chunks_deduplicated: stored.chunks_deduplicated,
            shell: chunks.is_empty(),
        })
    }

    async fn chunk_and_embed(&self, markdown: &str) -> Result<Vec<NewChunk>> {
        let mut chunks: Vec<NewChunk> = self
            .chunker
            .chunk(markdown)
            .into_iter()
            .map(|c| c.into_new_chunk())
            .collect();

        let Some(embedder) = &self.embedder else {
            return Ok(chunks);
        };
        if chunks.is_empty() {
            return Ok(chunks);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        let model = embedder.model_name().to_string();
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
            chunk.embedding_model = Some(model.clone());
        }
        trace!(
            subsystem = "jobs",
            component = "pipeline",
            model = %model,
            chunk_count = chunks.len(),
            "Embedded chunks"
        );
        Ok(chunks)
    }
}

enum PageOutcome {
    Unchanged {
        document_id: Uuid,
    },
    CarriedForward {
        document_id: Uuid,
    },
    Stored {
        document_id: Uuid,
        is_new: bool,
        chunks_inserted: usize,
        chunks_deduplicated: usize,
        shell: bool,
    },
}

/// Errors that end the run instead of counting against one page.
fn is_fatal(error: &Error) -> bool {
    matches!(error, Error::Database(_) | Error::Config(_))
}

struct BuildSink<'a> {
    pipeline: &'a BuildPipeline,
    ctx: VersionContext,
    reporter: &'a dyn ProgressReporter,
    progress: BuildProgress,
    /// Normalized URL to document id, for `parent_id`.
    documents: HashMap<String, Uuid>,
    chunks_written: usize,
    chunks_deduplicated: usize,
    shells: usize,
    carried_forward: usize,
    page_errors: Vec<(String, String)>,
    /// Url hashes of every page the crawl reached, fetched or not.
    visited: HashSet<String>,
    since_report: usize,
}

impl<'a> BuildSink<'a> {
    fn new(
        pipeline: &'a BuildPipeline,
        ctx: VersionContext,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            pipeline,
            ctx,
            reporter,
            progress: BuildProgress::default(),
            documents: HashMap::new(),
            chunks_written: 0,
            chunks_deduplicated: 0,
            shells: 0,
            carried_forward: 0,
            page_errors: Vec::new(),
            visited: HashSet::new(),
            since_report: 0,
        }
    }

    async fn page_handled(&mut self) {
        self.since_report += 1;
        if self.since_report >= self.pipeline.config.progress_every {
            self.since_report = 0;
            self.reporter.report_progress(&self.progress).await;
        }
    }

    fn into_report(
        self,
        source_id: Uuid,
        version_id: Uuid,
        crawl: CrawlSummary,
    ) -> (BuildReport, HashSet<String>) {
        let report = BuildReport {
            source_id,
            version_id,
            progress: self.progress,
            crawl,
            chunks_written: self.chunks_written,
            chunks_deduplicated: self.chunks_deduplicated,
            shells: self.shells,
            carried_forward: self.carried_forward,
            pruned: 0,
            page_errors: self.page_errors,
            published: None,
        };
        (report, self.visited)
    }
}

#[async_trait]
impl PageSink for BuildSink<'_> {
    async fn on_page(&mut self, page: CrawledPage) -> Result<()> {
        self.progress.crawled += 1;
        self.visited.insert(url_hash(page.url.as_str()));
        let parent_id = page
            .parent_url
            .as_ref()
            .and_then(|p| self.documents.get(p.as_str()).copied());

        match self.pipeline.process_page(&self.ctx, &page, parent_id).await {
            Ok(PageOutcome::Unchanged { document_id }) => {
                self.progress.skipped += 1;
                self.documents.insert(page.url.to_string(), document_id);
            }
            Ok(PageOutcome::CarriedForward { document_id }) => {
                self.progress.skipped += 1;
                self.carried_forward += 1;
                self.documents.insert(page.url.to_string(), document_id);
            }
            Ok(PageOutcome::Stored {
                document_id,
                is_new,
                chunks_inserted,
                chunks_deduplicated,
                shell,
            }) => {
                if is_new {
                    self.progress.new += 1;
                } else {
                    self.progress.updated += 1;
                }
                if shell {
                    self.shells += 1;
                }
                self.chunks_written += chunks_inserted;
                self.chunks_deduplicated += chunks_deduplicated;
                self.documents.insert(page.url.to_string(), document_id);
                debug!(
                    subsystem = "jobs",
                    component = "pipeline",
                    url = %page.url,
                    depth = page.depth,
                    document_id = %document_id,
                    chunk_count = chunks_inserted,
                    is_new,
                    "Stored page"
                );
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    url = %page.url,
                    error = %e,
                    "Page processing failed"
                );
                self.progress.errors += 1;
                self.page_errors.push((page.url.to_string(), e.to_string()));
            }
        }

        self.page_handled().await;
        Ok(())
    }

    async fn on_fetch_failure(&mut self, url: &Url, _error: &Error) -> Result<()> {
        self.progress.errors += 1;
        self.visited.insert(url_hash(url.as_str()));
        self.page_handled().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{html_page, FakeDocuments, FakeSources, FakeVersions, MapFetcher};
    use sitekb_core::{SourceRepository, SourceVersionStatus, TaskConfig};
    use sitekb_crawler::{AdapterResolver, HtmdConverter};
    use sitekb_inference::MockEmbedder;
    use std::sync::Mutex;

    const BODY: &str = "This guide explains how to configure the product for a team. \
        It covers accounts, permissions, billing and the first steps after signing up. \
        Read it before inviting colleagues so that everything is ready.";

    #[derive(Default)]
    struct Snapshots(Mutex<Vec<BuildProgress>>);

    #[async_trait]
    impl ProgressReporter for Snapshots {
        async fn report_progress(&self, progress: &BuildProgress) {
            self.0.lock().unwrap().push(*progress);
        }
    }

    struct Harness {
        fetcher: Arc<MapFetcher>,
        documents: Arc<FakeDocuments>,
        versions: Arc<FakeVersions>,
        embedder: MockEmbedder,
        pipeline: BuildPipeline,
        source: Source,
    }

    async fn harness(fetcher: MapFetcher) -> Harness {
        let fetcher = Arc::new(fetcher);
        let documents = Arc::new(FakeDocuments::default());
        let versions = Arc::new(FakeVersions::new(documents.clone()));
        let embedder = MockEmbedder::new(8);
        let orchestrator = Arc::new(CrawlOrchestrator::new(
            fetcher.clone(),
            Arc::new(AdapterResolver::new()),
        ));
        let pipeline = BuildPipeline::new(
            orchestrator,
            versions.clone(),
            documents.clone(),
            Arc::new(HtmdConverter::new()),
            Some(Arc::new(embedder.clone())),
        );
        let source = FakeSources::default()
            .ensure_source("docs", "https://docs.test/")
            .await
            .unwrap();
        Harness {
            fetcher,
            documents,
            versions,
            embedder,
            pipeline,
            source,
        }
    }

    fn site() -> MapFetcher {
        MapFetcher::default()
            .page(
                "https://docs.test/",
                &html_page("Home", BODY, &["/guide", "/faq"]),
            )
            .page("https://docs.test/guide", &html_page("Guide", BODY, &[]))
            .page(
                "https://docs.test/faq",
                &html_page("FAQ", &format!("Questions. {BODY}"), &[]),
            )
    }

    fn request(config: &TaskConfig) -> CrawlRequest {
        CrawlRequest::from_task("https://docs.test/", Some("docs"), &config.clone().with_rate_limit(0))
            .unwrap()
    }

    fn publish() -> BuildOptions {
        BuildOptions {
            auto_publish: true,
            commit_message: Some("test build".into()),
        }
    }

    #[tokio::test]
    async fn test_first_build_stores_and_publishes() {
        let h = harness(site()).await;
        let report = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(report.progress.crawled, 3);
        assert_eq!(report.progress.new, 3);
        assert_eq!(report.progress.errors, 0);
        assert!(report.chunks_written > 0);
        let published = report.published.unwrap();
        assert_eq!(published.version_id, report.version_id);
        assert!(published.archived_version_id.is_none());

        let docs = h.documents.docs_in(report.version_id);
        assert_eq!(docs.len(), 3);
        let home = h.documents.doc(report.version_id, "https://docs.test/").unwrap();
        let guide = h.documents.doc(report.version_id, "https://docs.test/guide").unwrap();
        assert_eq!(guide.parent_id, Some(home.id));
        assert!(guide
            .chunks
            .iter()
            .all(|c| c.embedding_model.as_deref() == Some("mock-embed") && c.embedding.is_some()));
        assert!(h.embedder.call_count() > 0);
    }

    fn published_urls(h: &Harness, version_id: Uuid) -> Vec<String> {
        let mut urls: Vec<String> = h
            .documents
            .docs_in(version_id)
            .into_iter()
            .map(|d| d.url)
            .collect();
        urls.sort();
        urls
    }

    #[tokio::test]
    async fn test_rebuild_drops_pages_no_longer_linked() {
        let h = harness(site()).await;
        let first = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        h.fetcher.set("https://docs.test/", &html_page("Home", BODY, &["/guide"]));
        let second = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(second.progress.crawled, 2);
        assert_eq!(second.pruned, 1);
        assert_eq!(second.summary_json()["pruned"], 1);
        assert_eq!(
            published_urls(&h, second.version_id),
            vec!["https://docs.test/", "https://docs.test/guide"]
        );
        assert_eq!(h.documents.docs_in(first.version_id).len(), 3);
    }

    #[tokio::test]
    async fn test_rebuild_keeps_page_that_failed_to_fetch() {
        let h = harness(site()).await;
        h.pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        h.fetcher.remove("https://docs.test/faq");
        let second = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(second.progress.errors, 1);
        assert_eq!(second.pruned, 0);
        assert_eq!(published_urls(&h, second.version_id).len(), 3);
    }

    #[tokio::test]
    async fn test_explicit_rebuild_keeps_rest_of_site() {
        let h = harness(site()).await;
        h.pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        let config = TaskConfig::default().with_urls(vec!["https://docs.test/faq".into()]);
        let second = h
            .pipeline
            .run(&h.source, &request(&config), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(second.progress.crawled, 1);
        assert_eq!(second.pruned, 0);
        assert_eq!(published_urls(&h, second.version_id).len(), 3);
    }

    #[tokio::test]
    async fn test_page_limit_skips_pruning() {
        let h = harness(site()).await;
        h.pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        let config = TaskConfig::default().with_max_pages(1);
        let second = h
            .pipeline
            .run(&h.source, &request(&config), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert!(second.crawl.hit_page_limit);
        assert_eq!(second.pruned, 0);
        assert_eq!(published_urls(&h, second.version_id).len(), 3);
    }

    #[tokio::test]
    async fn test_rebuild_skips_unchanged_and_updates_changed() {
        let h = harness(site()).await;
        let first = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        h.fetcher.set(
            "https://docs.test/faq",
            &html_page("FAQ", &format!("Revised questions. {BODY}"), &[]),
        );
        let upserts_before = h.documents.upserts();
        let second = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert_ne!(first.version_id, second.version_id);
        assert_eq!(second.progress.skipped, 2);
        assert_eq!(second.progress.updated, 1);
        assert_eq!(second.progress.new, 0);
        assert_eq!(h.documents.upserts(), upserts_before + 1);
        assert_eq!(
            second.published.unwrap().archived_version_id,
            Some(first.version_id)
        );

        let statuses: Vec<SourceVersionStatus> = h.versions.all().iter().map(|v| v.status).collect();
        assert_eq!(
            statuses,
            vec![SourceVersionStatus::Archived, SourceVersionStatus::Active]
        );
        assert_eq!(h.documents.docs_in(second.version_id).len(), 3);
    }

    #[tokio::test]
    async fn test_short_content_stored_without_chunks() {
        let fetcher = MapFetcher::default().page(
            "https://docs.test/",
            "<html><head><title>Tiny</title></head><body><main><p>Short.</p></main></body></html>",
        );
        let h = harness(fetcher).await;
        let report = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(report.progress.new, 1);
        assert_eq!(report.shells, 1);
        assert_eq!(report.chunks_written, 0);
        assert_eq!(h.embedder.call_count(), 0);
        let doc = h.documents.doc(report.version_id, "https://docs.test/").unwrap();
        assert!(doc.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failures_counted_and_nothing_published() {
        let h = harness(MapFetcher::default()).await;
        let report = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(report.progress.errors, 1);
        assert!(report.is_failure());
        assert!(report.published.is_none());
        assert!(report.failure_reason().contains("https://docs.test/"));
        assert_eq!(
            h.versions.all()[0].status,
            SourceVersionStatus::Building
        );
    }

    #[tokio::test]
    async fn test_embedding_failure_counts_against_page() {
        let fetcher = site();
        let h = harness(fetcher).await;
        let failing = MockEmbedder::new(8).failing_on("Questions");
        let pipeline = BuildPipeline::new(
            Arc::new(CrawlOrchestrator::new(
                h.fetcher.clone(),
                Arc::new(AdapterResolver::new()),
            )),
            h.versions.clone(),
            h.documents.clone(),
            Arc::new(HtmdConverter::new()),
            Some(Arc::new(failing)),
        );

        let report = pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(report.progress.new, 2);
        assert_eq!(report.progress.errors, 1);
        assert_eq!(report.page_errors.len(), 1);
        assert_eq!(report.page_errors[0].0, "https://docs.test/faq");
        assert!(report.published.is_some());
    }

    #[tokio::test]
    async fn test_stop_leaves_version_unpublished() {
        let h = harness(site()).await;
        let stop = StopFlag::new();
        stop.stop();
        let report = h
            .pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &NoProgress, &stop)
            .await
            .unwrap();

        assert!(report.stopped());
        assert!(report.published.is_none());
        assert_eq!(h.documents.upserts(), 0);
    }

    #[tokio::test]
    async fn test_manual_publish_left_to_caller() {
        let h = harness(site()).await;
        let report = h
            .pipeline
            .run(
                &h.source,
                &request(&TaskConfig::default()),
                &BuildOptions::default(),
                &NoProgress,
                &StopFlag::new(),
            )
            .await
            .unwrap();
        assert!(report.published.is_none());
        assert_eq!(h.versions.all()[0].status, SourceVersionStatus::Building);
    }

    #[tokio::test]
    async fn test_progress_reported_periodically_and_at_end() {
        let h = harness(site()).await;
        let pipeline = h
            .pipeline
            .with_config(PipelineConfig::default().with_progress_every(2));
        let snapshots = Snapshots::default();
        pipeline
            .run(&h.source, &request(&TaskConfig::default()), &publish(), &snapshots, &StopFlag::new())
            .await
            .unwrap();

        let seen = snapshots.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].crawled, 2);
        assert_eq!(seen[1].crawled, 3);
        assert_eq!(seen[1].new, 3);
    }

    #[tokio::test]
    async fn test_explicit_urls_do_not_follow_links() {
        let h = harness(site()).await;
        let config = TaskConfig::default().with_urls(vec!["https://docs.test/guide".into()]);
        let report = h
            .pipeline
            .run(&h.source, &request(&config), &publish(), &NoProgress, &StopFlag::new())
            .await
            .unwrap();
        assert_eq!(report.progress.crawled, 1);
        assert_eq!(report.summary_json()["progress"]["new"], 1);
    }
}
