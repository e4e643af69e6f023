//! Job runner: executes exactly one job and records its outcome.
//!
//! # Architecture
//!
//! ```text
//! POST /api/jobs/run {jobId}
//!     │
//!     └─► runner task (spawned, outlives a cancelled request)
//!             ├─► claim (pending -> running, compare-and-swap)
//!             │       └─► already running/done/error: return, handler not called
//!             ├─► JobRegistry.handle(job)   (spawned, panics captured)
//!             └─► complete (running -> done) | fail (running -> error, message kept)
//! ```
//!
//! The claim is the idempotency guard for at-least-once queue delivery: a
//! redelivered message for a job that is already running or finished never
//! reaches the handler a second time.
//!
//! Claim, handler and finalization run on one spawned task. Dropping the
//! `run_job` future (a client timeout cancelling the HTTP request) does not
//! strand the job in `running`.

use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{ClaimOutcome, Job, JobStatus, JobType};
use super::job_store::JobStore;
use super::registry::SharedJobRegistry;

#[derive(Debug, Error)]
pub enum RunJobError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Unsupported job type: {0}")]
    UnsupportedJobType(JobType),

    #[error("{0}")]
    HandlerFailed(String),

    #[error("Job store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// What happened to a job the runner was asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The handler ran and the job is now `done`.
    Completed { job_id: Uuid },
    /// The job was not pending; nothing ran.
    Skipped { job_id: Uuid, status: JobStatus },
}

impl RunOutcome {
    pub fn message(&self) -> String {
        match self {
            RunOutcome::Completed { job_id } => format!("Job {} completed", job_id),
            RunOutcome::Skipped { job_id, status } => {
                format!("Job {} already {}, skipping", job_id, status)
            }
        }
    }
}

/// Stateless executor; one call per queue callback.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    registry: SharedJobRegistry,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, registry: SharedJobRegistry) -> Self {
        Self { store, registry }
    }

    /// Run a job by id.
    ///
    /// Only the caller that moves the job from `pending` to `running` executes
    /// the handler. Every error after the claim leaves the job in `error`
    /// unless the store itself is unreachable, which is logged and returned.
    pub async fn run_job(&self, job_id: Uuid) -> Result<RunOutcome, RunJobError> {
        let runner = self.clone();
        let task = tokio::spawn(async move { runner.claim_and_execute(job_id).await });

        match task.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(job_id = %job_id, error = %join_error, "job runner task aborted");
                Err(RunJobError::Store(anyhow!("job runner task aborted: {}", join_error)))
            }
        }
    }

    async fn claim_and_execute(&self, job_id: Uuid) -> Result<RunOutcome, RunJobError> {
        let job = match self.store.claim(job_id).await.map_err(RunJobError::Store)? {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::AlreadyClaimed(status) => {
                info!(job_id = %job_id, status = %status, "job is not pending, skipping");
                return Ok(RunOutcome::Skipped { job_id, status });
            }
            ClaimOutcome::NotFound => return Err(RunJobError::NotFound(job_id)),
        };

        debug!(job_id = %job.id, job_type = %job.job_type, "executing job");
        self.execute(job).await
    }

    async fn execute(&self, job: Job) -> Result<RunOutcome, RunJobError> {
        let job_id = job.id;
        let job_type = job.job_type;

        let Some(handler) = self.registry.handle(job) else {
            let error = RunJobError::UnsupportedJobType(job_type);
            warn!(job_id = %job_id, job_type = %job_type, "no handler registered");
            self.record_failure(job_id, &error.to_string()).await?;
            return Err(error);
        };

        // Spawned so a panicking handler is reported like any other failure
        let result = match tokio::spawn(handler).await {
            Ok(result) => result,
            Err(join_error) => Err(anyhow!("job handler panicked: {}", join_error)),
        };

        match result {
            Ok(()) => {
                match self.store.complete(job_id).await {
                    Ok(true) => {}
                    Ok(false) => warn!(job_id = %job_id, "job left running state before completion"),
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "failed to mark job as done");
                        return Err(RunJobError::Store(e));
                    }
                }
                info!(job_id = %job_id, job_type = %job_type, "job succeeded");
                Ok(RunOutcome::Completed { job_id })
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(job_id = %job_id, job_type = %job_type, error = %message, "job failed");
                self.record_failure(job_id, &message).await?;
                Err(RunJobError::HandlerFailed(message))
            }
        }
    }

    async fn record_failure(&self, job_id: Uuid, message: &str) -> Result<(), RunJobError> {
        match self.store.fail(job_id, message).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(job_id = %job_id, "job left running state before failure was recorded");
                Ok(())
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to mark job as error");
                Err(RunJobError::Store(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::testing::TestJobStore;
    use crate::kernel::jobs::{JobRegistry, NewJob};

    async fn pending_job(store: &TestJobStore, job_type: JobType) -> Job {
        store
            .create(NewJob {
                job_type,
                target_id: "t1".into(),
                product_id: "p1".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_panicking_handler_marks_job_error() {
        let store = Arc::new(TestJobStore::new());
        let mut registry = JobRegistry::new();
        registry.register(JobType::ContentPlanner, |job: Job| async move {
            assert!(job.target_id.is_empty(), "planner exploded");
            Ok(())
        });
        let runner = JobRunner::new(store.clone(), Arc::new(registry));
        let job = pending_job(&store, JobType::ContentPlanner).await;

        let result = runner.run_job(job.id).await;

        assert!(matches!(result, Err(RunJobError::HandlerFailed(_))));
        let stored = store.get(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert!(stored.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_unsupported_type_terminalizes_job() {
        let store = Arc::new(TestJobStore::new());
        let runner = JobRunner::new(store.clone(), Arc::new(JobRegistry::new()));
        let job = pending_job(&store, JobType::ArticleGeneration).await;

        let result = runner.run_job(job.id).await;

        assert!(matches!(
            result,
            Err(RunJobError::UnsupportedJobType(JobType::ArticleGeneration))
        ));
        let stored = store.get(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(stored.error.as_deref(), Some("Unsupported job type: article_generation"));
    }

    #[tokio::test]
    async fn test_cancelled_caller_still_finalizes_job() {
        let store = Arc::new(TestJobStore::new());
        let mut registry = JobRegistry::new();
        registry.register(JobType::ContentPlanner, |_job: Job| async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok(())
        });
        let runner = JobRunner::new(store.clone(), Arc::new(registry));
        let job = pending_job(&store, JobType::ContentPlanner).await;

        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(20), runner.run_job(job.id)).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(store.get(job.id).unwrap().status, JobStatus::Done);
    }

    #[test]
    fn test_outcome_messages() {
        let job_id = Uuid::nil();
        assert!(RunOutcome::Completed { job_id }.message().ends_with("completed"));
        assert!(RunOutcome::Skipped {
            job_id,
            status: JobStatus::Done
        }
        .message()
        .contains("already done"));
    }
}
