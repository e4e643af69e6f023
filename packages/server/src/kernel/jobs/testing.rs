//! Job testing utilities.
//!
//! [`TestJobStore`] keeps jobs in memory, enforces the same state machine as
//! the Postgres store and records every transition so tests can assert on
//! the exact lifecycle a job went through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::job::{ActiveJobQuery, ClaimOutcome, Job, JobStatus, JobType, NewJob};
use super::job_store::JobStore;

/// A recorded status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// In-memory job store for tests.
#[derive(Default)]
pub struct TestJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    transitions: RwLock<Vec<Transition>>,
    unavailable: AtomicBool,
}

impl TestJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job as-is, bypassing `create`. Useful for seeding fixtures.
    pub fn insert(&self, job: Job) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id, job);
    }

    /// Make every subsequent operation fail, simulating an unreachable store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Get all jobs.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Get jobs in a given status.
    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<Job> {
        self.jobs()
            .into_iter()
            .filter(|j| j.status == status)
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// All transitions in the order they happened.
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Transitions recorded for one job.
    pub fn transitions_for(&self, job_id: Uuid) -> Vec<Transition> {
        self.transitions()
            .into_iter()
            .filter(|t| t.job_id == job_id)
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("job store unavailable");
        }
        Ok(())
    }

    /// Apply a transition if the state machine allows it from the current status.
    fn transition(&self, id: Uuid, allowed_from: &[JobStatus], to: JobStatus, error: Option<&str>) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };

        let from = job.status;
        if !allowed_from.contains(&from) || !from.can_transition_to(to) {
            return false;
        }

        job.status = to;
        job.error = error.map(str::to_string);
        job.updated_at = Utc::now();

        self.transitions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Transition { job_id: id, from, to });

        true
    }
}

#[async_trait]
impl JobStore for TestJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job> {
        self.check_available()?;
        let job = Job::from_new(new_job);
        self.insert(job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        self.check_available()?;
        Ok(self.get(id))
    }

    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome> {
        self.check_available()?;

        if self.transition(id, &[JobStatus::Pending], JobStatus::Running, None) {
            // Present: the transition just succeeded under the write lock
            return Ok(match self.get(id) {
                Some(job) => ClaimOutcome::Claimed(job),
                None => ClaimOutcome::NotFound,
            });
        }

        Ok(match self.get(id) {
            Some(job) => ClaimOutcome::AlreadyClaimed(job.status),
            None => ClaimOutcome::NotFound,
        })
    }

    async fn complete(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self.transition(id, &[JobStatus::Running], JobStatus::Done, None))
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.transition(
            id,
            &[JobStatus::Pending, JobStatus::Running],
            JobStatus::Error,
            Some(error),
        ))
    }

    async fn find_active(&self, query: &ActiveJobQuery) -> Result<Vec<Job>> {
        self.check_available()?;
        let mut jobs: Vec<Job> = self
            .jobs()
            .into_iter()
            .filter(|j| j.status.is_active() && query.matches(j))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn find_active_for_targets(
        &self,
        job_type: JobType,
        target_ids: &[String],
    ) -> Result<Vec<Job>> {
        self.check_available()?;
        let mut jobs: Vec<Job> = self
            .jobs()
            .into_iter()
            .filter(|j| {
                j.status.is_active() && j.job_type == job_type && target_ids.contains(&j.target_id)
            })
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}
