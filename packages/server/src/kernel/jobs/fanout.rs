//! Enqueue fan-out: candidates in, jobs plus queue messages out.
//!
//! Each candidate is processed independently: create a `pending` job, then
//! publish one message pointing the queue consumer at the job runner. At most
//! `fanout_concurrency` candidates are in flight at once. A failing candidate
//! produces an `Err` outcome and never affects the others.
//!
//! ```text
//! candidates ──► buffered(cap) ──► create job ──► publish message
//!                                       │               │
//!                                       ▼               ▼ (fails)
//!                                   Err outcome     mark job error, Err outcome
//! ```

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{Job, JobType};
use super::job_store::JobStore;
use super::selector::Candidate;
use crate::config::DispatchConfig;
use crate::kernel::nats::{JobMessageBody, MessageQueue, QueueMessage};

/// A candidate that became a job with a published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedJob {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub target_id: String,
    pub product_id: String,
}

impl From<&Job> for EnqueuedJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            target_id: job.target_id.clone(),
            product_id: job.product_id.clone(),
        }
    }
}

/// A candidate that could not be enqueued.
///
/// `job_id` is set when the job row was created but its message was not
/// published; that job has been moved to `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{job_type} for {target_id}: {error}")]
pub struct EnqueueFailure {
    pub job_type: JobType,
    pub target_id: String,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub error: String,
}

impl EnqueueFailure {
    fn new(candidate: Candidate, job_id: Option<Uuid>, error: String) -> Self {
        Self {
            job_type: candidate.job_type,
            target_id: candidate.target_id,
            product_id: candidate.product_id,
            job_id,
            error,
        }
    }
}

pub type EnqueueOutcome = Result<EnqueuedJob, EnqueueFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FanoutSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Per-candidate outcomes, in candidate order.
#[derive(Debug, Clone, Default)]
pub struct FanoutReport {
    pub outcomes: Vec<EnqueueOutcome>,
}

impl FanoutReport {
    pub fn summary(&self) -> FanoutSummary {
        let successful = self.outcomes.iter().filter(|o| o.is_ok()).count();
        FanoutSummary {
            total: self.outcomes.len(),
            successful,
            failed: self.outcomes.len() - successful,
        }
    }

    pub fn successful(&self) -> Vec<EnqueuedJob> {
        self.outcomes
            .iter()
            .filter_map(|o| o.as_ref().ok().cloned())
            .collect()
    }

    pub fn failed(&self) -> Vec<EnqueueFailure> {
        self.outcomes
            .iter()
            .filter_map(|o| o.as_ref().err().cloned())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.is_err())
    }
}

/// Bounded-concurrency enqueuer.
pub struct EnqueueFanout {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn MessageQueue>,
    config: DispatchConfig,
}

impl EnqueueFanout {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn MessageQueue>, config: DispatchConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Enqueue every candidate. Never fails as a whole.
    pub async fn run(&self, candidates: Vec<Candidate>) -> FanoutReport {
        let concurrency = self.config.fanout_concurrency.max(1);

        debug!(
            count = candidates.len(),
            concurrency, "enqueueing candidates"
        );

        let outcomes: Vec<EnqueueOutcome> = stream::iter(candidates)
            .map(|candidate| self.enqueue_one(candidate))
            .buffered(concurrency)
            .collect()
            .await;

        let report = FanoutReport { outcomes };
        let summary = report.summary();
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "fan-out complete"
        );

        report
    }

    async fn enqueue_one(&self, candidate: Candidate) -> EnqueueOutcome {
        let job = match self.store.create(candidate.clone().into()).await {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    job_type = %candidate.job_type,
                    target_id = %candidate.target_id,
                    error = %e,
                    "failed to create job"
                );
                return Err(EnqueueFailure::new(
                    candidate,
                    None,
                    format!("failed to create job: {}", e),
                ));
            }
        };

        if let Err(e) = self.publish(&job).await {
            let message = format!("failed to publish queue message: {}", e);
            warn!(job_id = %job.id, target_id = %job.target_id, error = %e, "publish failed");

            // The row exists but nothing will ever run it: terminalize it so
            // the target is selectable again on the next tick.
            match self.store.fail(job.id, &message).await {
                Ok(true) => {}
                Ok(false) => warn!(job_id = %job.id, "orphaned job was no longer pending"),
                Err(mark_err) => {
                    error!(job_id = %job.id, error = %mark_err, "failed to mark orphaned job as error")
                }
            }

            return Err(EnqueueFailure::new(candidate, Some(job.id), message));
        }

        debug!(job_id = %job.id, job_type = %job.job_type, target_id = %job.target_id, "job enqueued");
        Ok(EnqueuedJob::from(&job))
    }

    async fn publish(&self, job: &Job) -> anyhow::Result<()> {
        let message = QueueMessage {
            api_url: self.config.callback_url.clone(),
            body: serde_json::to_value(JobMessageBody::from(job))?,
        };
        self.queue.publish(&message).await
    }
}
