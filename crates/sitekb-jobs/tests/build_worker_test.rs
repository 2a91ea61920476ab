//! Knowledge builds end to end: mock site over HTTP, PostgreSQL storage.
//!
//! Requires DATABASE_URL with a reachable PostgreSQL + pgvector instance.
//! Run with `--ignored --test-threads=1`.

use std::sync::Arc;

use sitekb_core::{
    BuildStage, BuildTaskRepository, ClaimTarget, DocumentRepository, RecordingTaskRepository,
    SourceCategory, SourceRepository, SourceVersionStatus, StageStatus, TaskConfig, TaskDisposition,
    TaskOutcome, TaskQueue, VersionRepository,
};
use sitekb_crawler::{AdapterResolver, CrawlOrchestrator, FetcherConfig, HtmdConverter, HttpFetcher};
use sitekb_db::test_fixtures::TestDatabase;
use sitekb_inference::MockEmbedder;
use sitekb_jobs::{
    BuildPipeline, BuildTaskQueue, KnowledgeBuildHandler, RecordingTaskQueue, TaskWorker,
    WorkerConfig, WorkerEvent,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = "Reset a password from the sign-in page by following the emailed link. \
    Links expire after one hour, after which a new one has to be requested from the same page.";

async fn mount_page(server: &MockServer, route: &str, title: &str, links: &[&str]) {
    let anchors: String = links
        .iter()
        .map(|l| format!(r#"<a href="{l}">{l}</a> "#))
        .collect();
    let html = format!(
        "<html><head><title>{title}</title></head><body><main><h1>{title}</h1>\
         <h2>Details</h2><p>{title}: {BODY}</p><p>{anchors}</p></main></body></html>"
    );
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
        .mount(server)
        .await;
}

async fn mock_site() -> MockServer {
    let server = MockServer::start().await;
    mount_page(&server, "/", "Help center", &["/passwords", "/billing"]).await;
    mount_page(&server, "/passwords", "Passwords", &["/"]).await;
    mount_page(&server, "/billing", "Billing", &[]).await;
    server
}

fn pipeline(test_db: &TestDatabase) -> BuildPipeline {
    let fetcher = HttpFetcher::new(FetcherConfig::default().with_max_retries(0)).unwrap();
    BuildPipeline::new(
        Arc::new(CrawlOrchestrator::new(
            Arc::new(fetcher),
            Arc::new(AdapterResolver::new()),
        )),
        Arc::new(test_db.db.versions.clone()),
        Arc::new(test_db.db.documents.clone()),
        Arc::new(HtmdConverter::new()),
        Some(Arc::new(MockEmbedder::new(768))),
    )
}

fn worker(test_db: &TestDatabase) -> TaskWorker<BuildTaskQueue> {
    let config = WorkerConfig::default();
    let queue = Arc::new(BuildTaskQueue::new(
        Arc::new(test_db.db.build_tasks.clone()),
        config.claim_filter(ClaimTarget::KnowledgeBuild),
        config.claim_settings(),
    ));
    let handler = KnowledgeBuildHandler::new(
        Arc::new(test_db.db.sources.clone()),
        Arc::new(pipeline(test_db)),
    )
    .with_recordings(Arc::new(test_db.db.recording_tasks.clone()));

    TaskWorker::new(queue.clone(), Arc::new(handler), config).with_progress_store(queue)
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_worker_builds_and_publishes_site() {
    let test_db = TestDatabase::new().await;
    let server = mock_site().await;
    let task_id = test_db
        .seed_build_task(
            &format!("{}/", server.uri()),
            SourceCategory::Help,
            &TaskConfig::default().with_rate_limit(0),
        )
        .await;

    let worker = worker(&test_db);
    let mut events = worker.events();
    assert!(worker.run_once().await.unwrap());

    assert!(matches!(events.recv().await.unwrap(), WorkerEvent::TaskClaimed { .. }));
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::TaskCompleted { task_id: id, .. } = event {
            assert_eq!(id, task_id);
            completed = true;
        }
    }
    assert!(completed, "task did not complete");

    let task = test_db.db.build_tasks.get(task_id).await.unwrap().unwrap();
    assert_eq!(task.stage, BuildStage::KnowledgeBuild);
    assert_eq!(task.stage_status, StageStatus::Completed);
    let progress = task.config.progress.unwrap();
    assert_eq!(progress.new, 3);
    assert_eq!(progress.errors, 0);

    let source_id = task.source_id.unwrap();
    let active = test_db
        .db
        .versions
        .get_active(source_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.version_number, 1);
    assert_eq!(
        test_db.db.documents.count_by_version(active.id).await.unwrap(),
        3
    );

    let counts = test_db
        .db
        .recording_tasks
        .counts_for_build(task_id)
        .await
        .unwrap();
    assert!(counts.pending > 0);
    assert_eq!(counts.total(), counts.pending);

    let recordings = RecordingTaskQueue::new(
        Arc::new(test_db.db.recording_tasks.clone()),
        WorkerConfig::default().claim_settings(),
    )
    .for_build(task_id);
    let claimed = recordings.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.build_task_id, task_id);
    assert_eq!(claimed.source_id, source_id);
    assert!(recordings.heartbeat(claimed.id).await.unwrap());
    let disposition = recordings
        .report(&claimed, &TaskOutcome::completed(None))
        .await
        .unwrap();
    assert_eq!(disposition, TaskDisposition::Completed);

    let after = test_db
        .db
        .recording_tasks
        .counts_for_build(task_id)
        .await
        .unwrap();
    assert_eq!(after.completed, 1);
    assert_eq!(after.pending, counts.pending - 1);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_rebuild_of_unchanged_site_writes_nothing_new() {
    let test_db = TestDatabase::new().await;
    let server = mock_site().await;
    let source = test_db
        .db
        .sources
        .ensure_source("help", &format!("{}/", server.uri()))
        .await
        .unwrap();
    let request = sitekb_crawler::CrawlRequest::from_task(
        &source.base_url,
        None,
        &TaskConfig::default().with_rate_limit(0),
    )
    .unwrap();
    let options = sitekb_jobs::BuildOptions {
        auto_publish: true,
        commit_message: None,
    };
    let pipeline = pipeline(&test_db);
    let stop = sitekb_core::StopFlag::new();

    let first = pipeline
        .run(&source, &request, &options, &sitekb_jobs::NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(first.progress.new, 3);

    let second = pipeline
        .run(&source, &request, &options, &sitekb_jobs::NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(second.progress.skipped, 3);
    assert_eq!(second.progress.new + second.progress.updated, 0);
    assert_eq!(second.chunks_written, 0);

    let versions = test_db.db.versions.list(source.id).await.unwrap();
    let status_of = |id| versions.iter().find(|v| v.id == id).map(|v| v.status);
    assert_eq!(status_of(first.version_id), Some(SourceVersionStatus::Archived));
    assert_eq!(status_of(second.version_id), Some(SourceVersionStatus::Active));
    assert_eq!(
        test_db
            .db
            .documents
            .count_by_version(second.version_id)
            .await
            .unwrap(),
        3
    );
}
