//! Core data models for sitekb.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::task_config::TaskConfig;

// =============================================================================
// SOURCES AND VERSIONS
// =============================================================================

/// A crawl target.
///
/// Created once per target site. The publish step only ever mutates
/// `current_version_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub description: Option<String>,
    pub crawl_config: Option<JsonValue>,
    pub current_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a source version. Only ever moves building → active → archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceVersionStatus {
    Building,
    Active,
    Archived,
}

impl SourceVersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceVersionStatus::Building => "building",
            SourceVersionStatus::Active => "active",
            SourceVersionStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "building" => Some(SourceVersionStatus::Building),
            "active" => Some(SourceVersionStatus::Active),
            "archived" => Some(SourceVersionStatus::Archived),
            _ => None,
        }
    }
}

/// One crawl generation of a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVersion {
    pub id: Uuid,
    pub source_id: Uuid,
    pub version_number: i32,
    pub status: SourceVersionStatus,
    pub commit_message: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Result of an atomic Blue/Green publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    /// The version that is now active.
    pub version_id: Uuid,
    /// The previously active version, now archived.
    pub archived_version_id: Option<Uuid>,
}

// =============================================================================
// DOCUMENTS AND CHUNKS
// =============================================================================

/// One ancestor heading of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingItem {
    pub level: i32,
    pub text: String,
}

/// A fetched page stored within a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub source_id: Uuid,
    pub source_version_id: Uuid,
    pub url: String,
    pub url_hash: String,
    pub title: Option<String>,
    pub content_hash: String,
    pub depth: i32,
    pub breadcrumb: Vec<String>,
    pub parent_id: Option<Uuid>,
    pub word_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document fields written by the build pipeline.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub source_id: Uuid,
    pub source_version_id: Uuid,
    pub url: String,
    pub url_hash: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_text: Option<String>,
    pub content_html: Option<String>,
    pub content_md: Option<String>,
    pub content_hash: String,
    pub depth: i32,
    pub breadcrumb: Vec<String>,
    pub parent_id: Option<Uuid>,
    pub word_count: i32,
}

/// A chunk ready to be stored, optionally with its embedding.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub content_hash: String,
    pub chunk_index: i32,
    pub start_char: i32,
    pub end_char: i32,
    pub heading: Option<String>,
    pub heading_hierarchy: Vec<HeadingItem>,
    pub token_count: i32,
    pub embedding: Option<pgvector::Vector>,
    pub embedding_model: Option<String>,
}

/// Outcome of writing a document and its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredDocument {
    pub document_id: Uuid,
    /// Chunks inserted for this document.
    pub chunks_inserted: usize,
    /// Chunks skipped because identical text already exists in the version.
    pub chunks_deduplicated: usize,
}

// =============================================================================
// BUILD TASKS
// =============================================================================

/// Pipeline stage of a build task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Init,
    KnowledgeBuild,
    ActionBuild,
    Completed,
    Error,
}

impl BuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStage::Init => "init",
            BuildStage::KnowledgeBuild => "knowledge_build",
            BuildStage::ActionBuild => "action_build",
            BuildStage::Completed => "completed",
            BuildStage::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(BuildStage::Init),
            "knowledge_build" => Some(BuildStage::KnowledgeBuild),
            "action_build" => Some(BuildStage::ActionBuild),
            "completed" => Some(BuildStage::Completed),
            "error" => Some(BuildStage::Error),
            _ => None,
        }
    }

    /// Terminal stages are never claimed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStage::Completed | BuildStage::Error)
    }
}

/// Status within the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "running" => Some(StageStatus::Running),
            "completed" => Some(StageStatus::Completed),
            "error" => Some(StageStatus::Error),
            _ => None,
        }
    }
}

/// Category of site a build task targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    Help,
    Unknown,
    Any,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Help => "help",
            SourceCategory::Unknown => "unknown",
            SourceCategory::Any => "any",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "help" => Some(SourceCategory::Help),
            "unknown" => Some(SourceCategory::Unknown),
            "any" => Some(SourceCategory::Any),
            _ => None,
        }
    }

    /// Parse a comma-separated category list, ignoring unknown entries.
    pub fn parse_list(s: &str) -> Vec<Self> {
        s.split(',')
            .filter_map(|part| Self::parse(part.trim()))
            .collect()
    }

    /// The default set of categories accepted by the knowledge builder.
    pub fn defaults() -> Vec<Self> {
        defaults::SOURCE_CATEGORIES
            .iter()
            .filter_map(|s| Self::parse(s))
            .collect()
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of pipeline work.
///
/// Created by an external submitter and mutated only by the claim protocol
/// and the worker loop. `source_category` is kept as stored text so an
/// unsupported value reaches validation instead of failing the claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildTask {
    pub id: Uuid,
    pub source_id: Option<Uuid>,
    pub source_url: String,
    pub source_name: Option<String>,
    pub source_category: String,
    pub stage: BuildStage,
    pub stage_status: StageStatus,
    pub config: TaskConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub knowledge_started_at: Option<DateTime<Utc>>,
    pub knowledge_completed_at: Option<DateTime<Utc>>,
    pub action_started_at: Option<DateTime<Utc>>,
    pub action_completed_at: Option<DateTime<Utc>>,
}

/// Which stage transition a claim performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimTarget {
    /// `init/pending` → `knowledge_build/running`.
    KnowledgeBuild,
    /// `knowledge_build/completed` with a source → `action_build/running`.
    ActionBuild,
}

impl ClaimTarget {
    /// The stage a claimed task is in while running.
    pub fn stage(&self) -> BuildStage {
        match self {
            ClaimTarget::KnowledgeBuild => BuildStage::KnowledgeBuild,
            ClaimTarget::ActionBuild => BuildStage::ActionBuild,
        }
    }

    /// The (stage, status) a retryable task is reset to.
    pub fn ready_state(&self) -> (BuildStage, StageStatus) {
        match self {
            ClaimTarget::KnowledgeBuild => (BuildStage::Init, StageStatus::Pending),
            ClaimTarget::ActionBuild => (BuildStage::KnowledgeBuild, StageStatus::Completed),
        }
    }

    /// Column holding this stage's start timestamp.
    pub fn started_at_column(&self) -> &'static str {
        match self {
            ClaimTarget::KnowledgeBuild => "knowledge_started_at",
            ClaimTarget::ActionBuild => "action_started_at",
        }
    }

    /// Column holding this stage's completion timestamp.
    pub fn completed_at_column(&self) -> &'static str {
        match self {
            ClaimTarget::KnowledgeBuild => "knowledge_completed_at",
            ClaimTarget::ActionBuild => "action_completed_at",
        }
    }
}

/// Which build tasks a worker is willing to claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFilter {
    pub target: ClaimTarget,
    /// Empty means any category.
    pub categories: Vec<SourceCategory>,
}

impl ClaimFilter {
    pub fn new(target: ClaimTarget) -> Self {
        Self {
            target,
            categories: Vec::new(),
        }
    }

    pub fn with_categories(mut self, categories: Vec<SourceCategory>) -> Self {
        self.categories = categories;
        self
    }

    /// Category names bound into claim queries.
    pub fn category_strings(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|c| c.as_str().to_string())
            .collect()
    }
}

impl Default for ClaimFilter {
    fn default() -> Self {
        Self::new(ClaimTarget::KnowledgeBuild).with_categories(SourceCategory::defaults())
    }
}

/// Timing and attempt limits shared by every claim protocol instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimSettings {
    /// Running tasks older than this are reclaimed.
    pub stale_threshold: Duration,
    /// Attempts allowed before terminal error.
    pub max_attempts: i32,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(defaults::STALE_THRESHOLD_SECS),
            max_attempts: defaults::MAX_ATTEMPTS,
        }
    }
}

impl ClaimSettings {
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Stale threshold in whole seconds, as bound into SQL intervals.
    pub fn stale_threshold_secs(&self) -> f64 {
        self.stale_threshold.as_secs_f64()
    }
}

// =============================================================================
// RECORDING TASKS
// =============================================================================

/// Status of a per-chunk recording task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Pending => "pending",
            RecordingStatus::Running => "running",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordingStatus::Pending),
            "running" => Some(RecordingStatus::Running),
            "completed" => Some(RecordingStatus::Completed),
            "failed" => Some(RecordingStatus::Failed),
            _ => None,
        }
    }
}

/// A per-chunk unit consumed by the recording agent.
///
/// Scoped by `build_task_id` so the same chunk can be reprocessed under a
/// later build without colliding with its earlier row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingTask {
    pub id: Uuid,
    pub source_id: Uuid,
    pub document_id: Uuid,
    pub chunk_id: Uuid,
    pub build_task_id: Uuid,
    pub status: RecordingStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Counts of recording tasks by status for one build task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingTaskCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

impl RecordingTaskCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.completed + self.failed
    }

    /// Every task reached completed or failed.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_stage_round_trip() {
        for stage in [
            BuildStage::Init,
            BuildStage::KnowledgeBuild,
            BuildStage::ActionBuild,
            BuildStage::Completed,
            BuildStage::Error,
        ] {
            assert_eq!(BuildStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(BuildStage::parse("bogus"), None);
    }

    #[test]
    fn test_build_stage_terminal() {
        assert!(BuildStage::Completed.is_terminal());
        assert!(BuildStage::Error.is_terminal());
        assert!(!BuildStage::Init.is_terminal());
        assert!(!BuildStage::KnowledgeBuild.is_terminal());
    }

    #[test]
    fn test_stage_status_parse() {
        assert_eq!(StageStatus::parse("running"), Some(StageStatus::Running));
        assert_eq!(StageStatus::parse("Running"), None);
    }

    #[test]
    fn test_source_category_parse_list() {
        let cats = SourceCategory::parse_list("any, help,bogus,unknown");
        assert_eq!(
            cats,
            vec![
                SourceCategory::Any,
                SourceCategory::Help,
                SourceCategory::Unknown
            ]
        );
    }

    #[test]
    fn test_source_category_defaults() {
        let cats = SourceCategory::defaults();
        assert_eq!(cats.len(), 3);
        assert!(cats.contains(&SourceCategory::Any));
    }

    #[test]
    fn test_claim_target_ready_state() {
        assert_eq!(
            ClaimTarget::KnowledgeBuild.ready_state(),
            (BuildStage::Init, StageStatus::Pending)
        );
        assert_eq!(
            ClaimTarget::ActionBuild.ready_state(),
            (BuildStage::KnowledgeBuild, StageStatus::Completed)
        );
        assert_eq!(ClaimTarget::ActionBuild.stage(), BuildStage::ActionBuild);
    }

    #[test]
    fn test_claim_filter_category_strings() {
        let filter = ClaimFilter::new(ClaimTarget::KnowledgeBuild)
            .with_categories(vec![SourceCategory::Help]);
        assert_eq!(filter.category_strings(), vec!["help".to_string()]);
        assert!(ClaimFilter::new(ClaimTarget::KnowledgeBuild)
            .category_strings()
            .is_empty());
    }

    #[test]
    fn test_claim_settings_defaults() {
        let settings = ClaimSettings::default();
        assert_eq!(settings.stale_threshold, Duration::from_secs(600));
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.stale_threshold_secs(), 600.0);
    }

    #[test]
    fn test_claim_settings_max_attempts_floor() {
        let settings = ClaimSettings::default().with_max_attempts(0);
        assert_eq!(settings.max_attempts, 1);
    }

    #[test]
    fn test_version_status_round_trip() {
        for status in [
            SourceVersionStatus::Building,
            SourceVersionStatus::Active,
            SourceVersionStatus::Archived,
        ] {
            assert_eq!(SourceVersionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_recording_counts_settled() {
        let counts = RecordingTaskCounts {
            pending: 0,
            running: 0,
            completed: 4,
            failed: 1,
        };
        assert!(counts.is_settled());
        assert_eq!(counts.total(), 5);

        let busy = RecordingTaskCounts {
            running: 1,
            ..counts
        };
        assert!(!busy.is_settled());
    }

    #[test]
    fn test_heading_item_serde() {
        let item = HeadingItem {
            level: 2,
            text: "Install".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json, serde_json::json!({"level": 2, "text": "Install"}));
    }
}
