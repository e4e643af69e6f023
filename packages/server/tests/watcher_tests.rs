//! State watcher tests: scripted polls, the in-process store source and the
//! HTTP active-job view.

mod common;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use common::TestApp;
use dispatch_core::kernel::jobs::{
    ActiveJobQuery, ActiveJobSource, CompletedJob, HttpActiveJobSource, Job, JobRegistry,
    JobStatus, JobStore, JobType, JobWatcher, NewJob, StoreActiveJobSource, WatchEnd,
    WatcherConfig,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn fast() -> WatcherConfig {
    WatcherConfig {
        poll_interval: Duration::from_millis(10),
    }
}

fn job(status: JobStatus) -> Job {
    Job::builder()
        .job_type(JobType::ContentPlanner)
        .target_id("product-1")
        .product_id("product-1")
        .status(status)
        .build()
}

/// Poll step in a scripted source.
enum Poll {
    Returns(Option<Job>),
    Fails,
}

/// Answers polls from a script, then reports no active job forever.
#[derive(Clone)]
struct ScriptedSource {
    script: Arc<Mutex<VecDeque<Poll>>>,
    polls: Arc<AtomicUsize>,
    lookup: Arc<Mutex<Option<Job>>>,
}

impl ScriptedSource {
    fn new(script: Vec<Poll>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            polls: Arc::new(AtomicUsize::new(0)),
            lookup: Arc::new(Mutex::new(None)),
        }
    }

    /// Job returned by id lookups.
    fn with_lookup(self, job: Job) -> Self {
        *self.lookup.lock().unwrap() = Some(job);
        self
    }

    fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActiveJobSource for ScriptedSource {
    async fn active_job(&self, _query: &ActiveJobQuery) -> Result<Option<Job>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Poll::Returns(job)) => Ok(job),
            Some(Poll::Fails) => bail!("view unavailable"),
            None => Ok(None),
        }
    }

    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .lookup
            .lock()
            .unwrap()
            .clone()
            .filter(|job| job.id == job_id))
    }
}

/// Run a watcher until `after`, collecting completions.
async fn watch_for<S: ActiveJobSource>(
    watcher: &JobWatcher<S>,
    after: Duration,
) -> (WatchEnd, Vec<CompletedJob>) {
    let completions = Arc::new(Mutex::new(Vec::new()));
    let sink = completions.clone();
    let shutdown = CancellationToken::new();
    let cancel = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        cancel.cancel();
    });

    let end = watcher
        .run(move |completed| sink.lock().unwrap().push(completed), shutdown)
        .await;

    let collected = completions.lock().unwrap().clone();
    (end, collected)
}

#[tokio::test]
async fn test_single_callback_on_disappearance() {
    let active = job(JobStatus::Running);
    let mut finished = active.clone();
    finished.status = JobStatus::Done;
    let source = ScriptedSource::new(vec![
        Poll::Returns(Some(active.clone())),
        Poll::Returns(None),
        Poll::Returns(None),
        Poll::Returns(None),
    ])
    .with_lookup(finished);
    let watcher = JobWatcher::with_config(source.clone(), ActiveJobQuery::for_product("product-1"), fast());

    let (end, completions) = watch_for(&watcher, Duration::from_secs(5)).await;

    assert_eq!(end, WatchEnd::Terminal);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].job_id, active.id);
    assert_eq!(completions[0].status, Some(JobStatus::Done));
    // No polling once the job is known to be finished
    assert_eq!(source.polls(), 2);
}

#[tokio::test]
async fn test_failed_lookup_still_reports_completion() {
    let active = job(JobStatus::Running);
    let source = ScriptedSource::new(vec![Poll::Returns(Some(active.clone())), Poll::Returns(None)]);
    let watcher = JobWatcher::with_config(source, ActiveJobQuery::default(), fast());

    let (end, completions) = watch_for(&watcher, Duration::from_secs(5)).await;

    assert_eq!(end, WatchEnd::Terminal);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, None);
}

#[tokio::test]
async fn test_never_active_never_fires() {
    let source = ScriptedSource::new(vec![]);
    let watcher = JobWatcher::with_config(source, ActiveJobQuery::default(), fast());

    let (end, completions) = watch_for(&watcher, Duration::from_millis(60)).await;

    assert_eq!(end, WatchEnd::Cancelled);
    assert!(completions.is_empty());
}

#[tokio::test]
async fn test_poll_errors_do_not_fire_or_stop() {
    let active = job(JobStatus::Pending);
    let source = ScriptedSource::new(vec![
        Poll::Returns(Some(active.clone())),
        Poll::Fails,
        Poll::Fails,
        Poll::Returns(Some(active.clone())),
        Poll::Returns(None),
    ]);
    let watcher = JobWatcher::with_config(source.clone(), ActiveJobQuery::default(), fast());

    let (end, completions) = watch_for(&watcher, Duration::from_secs(5)).await;

    assert_eq!(end, WatchEnd::Terminal);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].job_id, active.id);
    assert_eq!(source.polls(), 5);
}

#[tokio::test]
async fn test_terminal_view_stops_polling() {
    let mut finished = job(JobStatus::Running);
    let source_job = finished.clone();
    finished.status = JobStatus::Done;
    let source = ScriptedSource::new(vec![
        Poll::Returns(Some(source_job)),
        Poll::Returns(Some(finished.clone())),
    ]);
    let watcher = JobWatcher::with_config(source.clone(), ActiveJobQuery::default(), fast());

    let (end, completions) = watch_for(&watcher, Duration::from_secs(5)).await;

    assert_eq!(end, WatchEnd::Terminal);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, Some(JobStatus::Done));
    assert_eq!(source.polls(), 2);
}

#[tokio::test]
async fn test_store_source_stops_when_runner_finishes() {
    let mut registry = JobRegistry::new();
    registry.register(JobType::ContentPlanner, |_job: Job| async move { Ok(()) });
    let app = TestApp::with_registry(registry);
    let created = app
        .store
        .create(NewJob {
            job_type: JobType::ContentPlanner,
            target_id: "product-1".into(),
            product_id: "product-1".into(),
        })
        .await
        .unwrap();

    let watcher = JobWatcher::with_config(
        StoreActiveJobSource::new(app.store.clone()),
        ActiveJobQuery::for_target(JobType::ContentPlanner, "product-1"),
        fast(),
    );

    let runner = app.deps.runner();
    let job_id = created.id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        runner.run_job(job_id).await.unwrap();
    });

    let (end, completions) = watch_for(&watcher, Duration::from_secs(5)).await;

    assert_eq!(end, WatchEnd::Terminal);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].job_id, created.id);
    assert_eq!(completions[0].status, Some(JobStatus::Done));
    assert_eq!(app.store.get(created.id).unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn test_store_source_reports_failed_job() {
    let mut registry = JobRegistry::new();
    registry.register(JobType::ArticleGeneration, |_job: Job| async move {
        bail!("generator unavailable")
    });
    let app = TestApp::with_registry(registry);
    let created = app
        .store
        .create(NewJob {
            job_type: JobType::ArticleGeneration,
            target_id: "article-3".into(),
            product_id: "product-3".into(),
        })
        .await
        .unwrap();

    let watcher = JobWatcher::with_config(
        StoreActiveJobSource::new(app.store.clone()),
        ActiveJobQuery::for_product("product-3"),
        fast(),
    );

    let runner = app.deps.runner();
    let job_id = created.id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = runner.run_job(job_id).await;
    });

    let (end, completions) = watch_for(&watcher, Duration::from_secs(5)).await;

    assert_eq!(end, WatchEnd::Terminal);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, Some(JobStatus::Error));
}

#[tokio::test]
async fn test_http_source_stops_after_completion() {
    let app = TestApp::new();
    let created = app
        .store
        .create(NewJob {
            job_type: JobType::ContentPlanner,
            target_id: "product-7".into(),
            product_id: "product-7".into(),
        })
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let watcher = JobWatcher::with_config(
        HttpActiveJobSource::new(format!("http://{}", addr)),
        ActiveJobQuery::for_product("product-7"),
        fast(),
    );

    let store = app.store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.claim(created.id).await.unwrap();
        store.complete(created.id).await.unwrap();
    });

    let (end, completions) = watch_for(&watcher, Duration::from_secs(5)).await;

    assert_eq!(end, WatchEnd::Terminal);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].job_id, created.id);
    assert_eq!(completions[0].status, Some(JobStatus::Done));
}

#[tokio::test]
async fn test_http_source_reads_active_view() {
    let app = TestApp::new();
    let created = app
        .store
        .create(NewJob {
            job_type: JobType::ArticleGeneration,
            target_id: "article-9".into(),
            product_id: "product-9".into(),
        })
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let source = HttpActiveJobSource::new(format!("http://{}/", addr));

    let active = source
        .active_job(&ActiveJobQuery::for_product("product-9"))
        .await
        .unwrap();
    assert_eq!(active.map(|j| j.id), Some(created.id));

    app.store.fail(created.id, "publish failed").await.unwrap();

    let active = source
        .active_job(&ActiveJobQuery::for_product("product-9"))
        .await
        .unwrap();
    assert!(active.is_none());

    let fetched = source.fetch_job(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, JobStatus::Error);
    assert_eq!(fetched.error.as_deref(), Some("publish failed"));
}
