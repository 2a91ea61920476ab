//! In-memory repositories and fetchers for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use url::Url;
use uuid::Uuid;

use sitekb_core::{
    content_hash, url_hash, BuildProgress, BuildStage, BuildTask, ClaimSettings, DocumentRepository,
    Error, NewChunk, NewDocument, PublishResult, RecordingTask, RecordingTaskCounts,
    RecordingTaskRepository, Result, RetryPolicy, Source, SourceRepository, SourceVersion,
    SourceVersionStatus, StageStatus, StoredDocument, TaskConfig, TaskDisposition, TaskOutcome,
    VersionRepository,
};
use sitekb_crawler::{FetchedPage, PageFetcher};

use crate::handler::ProgressStore;

pub fn build_task(url: &str, config: TaskConfig) -> BuildTask {
    BuildTask {
        id: Uuid::new_v4(),
        source_id: None,
        source_url: url.to_string(),
        source_name: Some("docs".to_string()),
        source_category: "help".to_string(),
        stage: BuildStage::KnowledgeBuild,
        stage_status: StageStatus::Running,
        config,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        knowledge_started_at: Some(Utc::now()),
        knowledge_completed_at: None,
        action_started_at: None,
        action_completed_at: None,
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub id: Uuid,
    pub version_id: Uuid,
    pub url: String,
    pub content_hash: String,
    pub parent_id: Option<Uuid>,
    pub chunks: Vec<NewChunk>,
}

#[derive(Default)]
struct DocState {
    docs: HashMap<(Uuid, String), StoredDoc>,
    upserts: usize,
    carried: usize,
}

#[derive(Default)]
pub struct FakeDocuments {
    state: Mutex<DocState>,
}

impl FakeDocuments {
    /// Store a document with no chunks; returns its id.
    pub fn seed(&self, version_id: Uuid, url: &str, text: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().docs.insert(
            (version_id, url_hash(url)),
            StoredDoc {
                id,
                version_id,
                url: url.to_string(),
                content_hash: content_hash(text),
                parent_id: None,
                chunks: Vec::new(),
            },
        );
        id
    }

    pub fn upserts(&self) -> usize {
        self.state.lock().unwrap().upserts
    }

    pub fn carried(&self) -> usize {
        self.state.lock().unwrap().carried
    }

    pub fn docs_in(&self, version_id: Uuid) -> Vec<StoredDoc> {
        let mut docs: Vec<StoredDoc> = self
            .state
            .lock()
            .unwrap()
            .docs
            .values()
            .filter(|d| d.version_id == version_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.url.cmp(&b.url));
        docs
    }

    pub fn doc(&self, version_id: Uuid, url: &str) -> Option<StoredDoc> {
        self.state
            .lock()
            .unwrap()
            .docs
            .get(&(version_id, url_hash(url)))
            .cloned()
    }

    /// Copy every document of `from` into `to` under fresh ids.
    pub fn copy_version(&self, from: Uuid, to: Uuid) {
        let mut state = self.state.lock().unwrap();
        let copies: Vec<StoredDoc> = state
            .docs
            .values()
            .filter(|d| d.version_id == from)
            .map(|d| StoredDoc {
                id: Uuid::new_v4(),
                version_id: to,
                ..d.clone()
            })
            .collect();
        for doc in copies {
            state.docs.insert((to, url_hash(&doc.url)), doc);
        }
    }
}

#[async_trait]
impl DocumentRepository for FakeDocuments {
    async fn find_content_hash(
        &self,
        version_id: Uuid,
        url_hash: &str,
    ) -> Result<Option<(Uuid, String)>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .docs
            .get(&(version_id, url_hash.to_string()))
            .map(|d| (d.id, d.content_hash.clone())))
    }

    async fn upsert_with_chunks(
        &self,
        document: &NewDocument,
        chunks: &[NewChunk],
    ) -> Result<StoredDocument> {
        let mut state = self.state.lock().unwrap();
        state.upserts += 1;
        let key = (document.source_version_id, document.url_hash.clone());
        let id = state.docs.get(&key).map(|d| d.id).unwrap_or_else(Uuid::new_v4);

        let taken: HashSet<String> = state
            .docs
            .values()
            .filter(|d| d.version_id == document.source_version_id && d.id != id)
            .flat_map(|d| d.chunks.iter().map(|c| c.content_hash.clone()))
            .collect();
        let kept: Vec<NewChunk> = chunks
            .iter()
            .filter(|c| !taken.contains(&c.content_hash))
            .cloned()
            .collect();
        let deduplicated = chunks.len() - kept.len();

        state.docs.insert(
            key,
            StoredDoc {
                id,
                version_id: document.source_version_id,
                url: document.url.clone(),
                content_hash: document.content_hash.clone(),
                parent_id: document.parent_id,
                chunks: kept.clone(),
            },
        );
        Ok(StoredDocument {
            document_id: id,
            chunks_inserted: kept.len(),
            chunks_deduplicated: deduplicated,
        })
    }

    async fn carry_forward(&self, document_id: Uuid, to_version: Uuid) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        let doc = state
            .docs
            .values()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("document {document_id}")))?;
        let id = Uuid::new_v4();
        state.carried += 1;
        state.docs.insert(
            (to_version, url_hash(&doc.url)),
            StoredDoc {
                id,
                version_id: to_version,
                ..doc
            },
        );
        Ok(id)
    }

    async fn prune_unvisited(&self, version_id: Uuid, keep: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.docs.len();
        state
            .docs
            .retain(|(version, hash), _| *version != version_id || keep.contains(hash));
        Ok((before - state.docs.len()) as u64)
    }

    async fn count_by_version(&self, version_id: Uuid) -> Result<i64> {
        Ok(self.docs_in(version_id).len() as i64)
    }
}

// =============================================================================
// VERSIONS AND SOURCES
// =============================================================================

pub struct FakeVersions {
    documents: Arc<FakeDocuments>,
    versions: Mutex<Vec<SourceVersion>>,
}

impl FakeVersions {
    pub fn new(documents: Arc<FakeDocuments>) -> Self {
        Self {
            documents,
            versions: Mutex::new(Vec::new()),
        }
    }

    pub fn all(&self) -> Vec<SourceVersion> {
        self.versions.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionRepository for FakeVersions {
    async fn create_building_version(
        &self,
        source_id: Uuid,
        commit_message: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<SourceVersion> {
        let (version, active) = {
            let mut versions = self.versions.lock().unwrap();
            if let Some(existing) = versions
                .iter()
                .find(|v| v.source_id == source_id && v.status == SourceVersionStatus::Building)
            {
                return Ok(existing.clone());
            }
            let next = versions
                .iter()
                .filter(|v| v.source_id == source_id)
                .map(|v| v.version_number)
                .max()
                .unwrap_or(0)
                + 1;
            let active = versions
                .iter()
                .find(|v| v.source_id == source_id && v.status == SourceVersionStatus::Active)
                .map(|v| v.id);
            let version = SourceVersion {
                id: Uuid::new_v4(),
                source_id,
                version_number: next,
                status: SourceVersionStatus::Building,
                commit_message: commit_message.map(String::from),
                created_by: created_by.map(String::from),
                created_at: Utc::now(),
                published_at: None,
            };
            versions.push(version.clone());
            (version, active)
        };
        if let Some(active) = active {
            self.documents.copy_version(active, version.id);
        }
        Ok(version)
    }

    async fn get_building(&self, source_id: Uuid) -> Result<Option<SourceVersion>> {
        Ok(self
            .all()
            .into_iter()
            .find(|v| v.source_id == source_id && v.status == SourceVersionStatus::Building))
    }

    async fn get_active(&self, source_id: Uuid) -> Result<Option<SourceVersion>> {
        Ok(self
            .all()
            .into_iter()
            .find(|v| v.source_id == source_id && v.status == SourceVersionStatus::Active))
    }

    async fn list(&self, source_id: Uuid) -> Result<Vec<SourceVersion>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|v| v.source_id == source_id)
            .collect())
    }

    async fn publish(&self, source_id: Uuid) -> Result<PublishResult> {
        let mut versions = self.versions.lock().unwrap();
        let building = versions
            .iter()
            .filter(|v| v.source_id == source_id && v.status == SourceVersionStatus::Building)
            .map(|v| v.id)
            .last()
            .ok_or_else(|| Error::NotFound(format!("building version for source {source_id}")))?;
        let mut archived = None;
        for v in versions.iter_mut().filter(|v| v.source_id == source_id) {
            if v.status == SourceVersionStatus::Active {
                v.status = SourceVersionStatus::Archived;
                archived = Some(v.id);
            }
            if v.id == building {
                v.status = SourceVersionStatus::Active;
                v.published_at = Some(Utc::now());
            }
        }
        Ok(PublishResult {
            version_id: building,
            archived_version_id: archived,
        })
    }

    async fn delete_version(&self, version_id: Uuid) -> Result<()> {
        self.versions.lock().unwrap().retain(|v| v.id != version_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSources {
    sources: Mutex<HashMap<String, Source>>,
}

#[async_trait]
impl SourceRepository for FakeSources {
    async fn ensure_source(&self, name: &str, base_url: &str) -> Result<Source> {
        let mut sources = self.sources.lock().unwrap();
        Ok(sources
            .entry(name.to_string())
            .or_insert_with(|| Source {
                id: Uuid::new_v4(),
                name: name.to_string(),
                base_url: base_url.to_string(),
                description: None,
                crawl_config: None,
                current_version_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .clone())
    }

    async fn get(&self, source_id: Uuid) -> Result<Option<Source>> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .values()
            .find(|s| s.id == source_id)
            .cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Source>> {
        Ok(self.sources.lock().unwrap().get(name).cloned())
    }
}

// =============================================================================
// TASK STORAGE
// =============================================================================

/// Records enqueue calls; claims nothing.
#[derive(Default)]
pub struct FakeRecordings {
    pub enqueued: Mutex<Vec<(Uuid, Uuid, Uuid)>>,
    /// Fail every enqueue.
    pub unavailable: bool,
}

impl FakeRecordings {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl RecordingTaskRepository for FakeRecordings {
    async fn enqueue_for_version(
        &self,
        build_task_id: Uuid,
        source_id: Uuid,
        version_id: Uuid,
    ) -> Result<u64> {
        if self.unavailable {
            return Err(Error::Task("recording queue unavailable".into()));
        }
        self.enqueued
            .lock()
            .unwrap()
            .push((build_task_id, source_id, version_id));
        Ok(1)
    }

    async fn claim_next(
        &self,
        _build_task_id: Option<Uuid>,
        _settings: &ClaimSettings,
    ) -> Result<Option<RecordingTask>> {
        Ok(None)
    }

    async fn heartbeat(&self, _task_id: Uuid) -> Result<bool> {
        Ok(true)
    }

    async fn report(
        &self,
        task: &RecordingTask,
        outcome: &TaskOutcome,
        settings: &ClaimSettings,
    ) -> Result<TaskDisposition> {
        Ok(RetryPolicy::new(settings.max_attempts).decide(task.attempt_count, outcome))
    }

    async fn counts_for_build(&self, _build_task_id: Uuid) -> Result<RecordingTaskCounts> {
        Ok(RecordingTaskCounts::default())
    }
}

/// Keeps every persisted progress snapshot.
#[derive(Default)]
pub struct FakeProgress {
    pub snapshots: Mutex<Vec<BuildProgress>>,
}

#[async_trait]
impl ProgressStore for FakeProgress {
    async fn record_progress(&self, _task_id: Uuid, progress: &BuildProgress) -> Result<()> {
        self.snapshots.lock().unwrap().push(*progress);
        Ok(())
    }
}

// =============================================================================
// FETCHER
// =============================================================================

/// Serves pages from a map; anything missing is a 404.
#[derive(Default)]
pub struct MapFetcher {
    pages: Mutex<HashMap<String, String>>,
}

impl MapFetcher {
    pub fn page(self, url: &str, body: &str) -> Self {
        self.set(url, body);
        self
    }

    pub fn set(&self, url: &str, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn remove(&self, url: &str) {
        self.pages.lock().unwrap().remove(url);
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        let body = self.pages.lock().unwrap().get(url.as_str()).cloned();
        match body {
            Some(body) => Ok(FetchedPage {
                final_url: url.clone(),
                status: 200,
                body,
            }),
            None => Err(Error::Crawl(format!("{url}: HTTP 404 Not Found"))),
        }
    }
}

/// A page with a title, a long body, and the given links.
pub fn html_page(title: &str, body: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|h| format!(r#"<a href="{h}">{h}</a>"#))
        .collect();
    format!(
        "<html><head><title>{title}</title></head><body><main><h1>{title}</h1>\
         <h2>Overview</h2><p>{body}</p><nav>{anchors}</nav><p>{anchors}</p></main></body></html>"
    )
}
