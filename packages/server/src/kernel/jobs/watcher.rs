//! Client-side job watcher.
//!
//! Polls the active-job view for a scope and reports completion when a job
//! that was active disappears from it. Detection is edge-triggered: one
//! callback per active -> absent transition, nothing while the view stays
//! empty.
//!
//! Status only moves forward, so a job that left the active view is `done`
//! or `error`. On that edge the watcher looks the job up by id to learn
//! which, reports it and stops polling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::job::{ActiveJobQuery, Job, JobStatus, JobType};
use super::job_store::JobStore;

/// Where the watcher reads the active job for its scope from.
#[async_trait]
pub trait ActiveJobSource: Send + Sync {
    async fn active_job(&self, query: &ActiveJobQuery) -> Result<Option<Job>>;

    /// Look up a single job regardless of status.
    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<Job>>;
}

/// Reads straight from a job store (in-process watchers, tests).
pub struct StoreActiveJobSource {
    store: Arc<dyn JobStore>,
}

impl StoreActiveJobSource {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActiveJobSource for StoreActiveJobSource {
    async fn active_job(&self, query: &ActiveJobQuery) -> Result<Option<Job>> {
        Ok(self.store.find_active(query).await?.into_iter().next())
    }

    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.store.find_by_id(job_id).await
    }
}

/// Reads the active-job view over HTTP.
#[derive(Clone)]
pub struct HttpActiveJobSource {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpActiveJobSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ActiveJobSource for HttpActiveJobSource {
    async fn active_job(&self, query: &ActiveJobQuery) -> Result<Option<Job>> {
        let job = self
            .get("/api/jobs/active")
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json::<Option<Job>>()
            .await?;
        Ok(job)
    }

    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let response = self.get(&format!("/api/jobs/{}", job_id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json().await?))
    }
}

/// A job that was active at the previous poll and is not anymore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub job_id: Uuid,
    pub job_type: JobType,
    /// `done` or `error`; `None` when the job could not be looked up.
    pub status: Option<JobStatus>,
}

/// Edge detector over successive active-job observations.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    active: Option<Job>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one poll result. Returns a completion on the active -> absent edge.
    pub fn observe(&mut self, current: Option<Job>) -> Option<CompletedJob> {
        let completed = match (&self.active, &current) {
            (Some(previous), None) => Some(CompletedJob {
                job_id: previous.id,
                job_type: previous.job_type,
                status: None,
            }),
            (Some(_), Some(job)) if job.status.is_terminal() => Some(CompletedJob {
                job_id: job.id,
                job_type: job.job_type,
                status: Some(job.status),
            }),
            _ => None,
        };

        self.active = current.filter(|job| job.status.is_active());
        completed
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Why the watch loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// The watched job reached done or error.
    Terminal,
    Cancelled,
}

/// Polls an [`ActiveJobSource`] and raises completion callbacks.
pub struct JobWatcher<S> {
    source: S,
    query: ActiveJobQuery,
    config: WatcherConfig,
}

impl<S: ActiveJobSource> JobWatcher<S> {
    pub fn new(source: S, query: ActiveJobQuery) -> Self {
        Self::with_config(source, query, WatcherConfig::default())
    }

    pub fn with_config(source: S, query: ActiveJobQuery, config: WatcherConfig) -> Self {
        Self {
            source,
            query,
            config,
        }
    }

    /// Poll until the watched job is terminal or `shutdown` is cancelled.
    pub async fn run<F>(&self, mut on_complete: F, shutdown: CancellationToken) -> WatchEnd
    where
        F: FnMut(CompletedJob) + Send,
    {
        let mut tracker = CompletionTracker::new();

        loop {
            if shutdown.is_cancelled() {
                return WatchEnd::Cancelled;
            }

            match self.source.active_job(&self.query).await {
                Ok(current) => {
                    let terminal = current.as_ref().is_some_and(|job| job.status.is_terminal());
                    if let Some(mut completed) = tracker.observe(current) {
                        if completed.status.is_none() {
                            completed.status = self.resolve_status(completed.job_id).await;
                        }
                        debug!(job_id = %completed.job_id, status = ?completed.status, "watched job completed");
                        on_complete(completed);
                        return WatchEnd::Terminal;
                    }
                    if terminal {
                        return WatchEnd::Terminal;
                    }
                }
                Err(e) => warn!(error = %e, "failed to poll active job"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return WatchEnd::Cancelled,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn resolve_status(&self, job_id: Uuid) -> Option<JobStatus> {
        match self.source.fetch_job(job_id).await {
            Ok(job) => job.map(|job| job.status).filter(JobStatus::is_terminal),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to look up completed job");
                None
            }
        }
    }
}
