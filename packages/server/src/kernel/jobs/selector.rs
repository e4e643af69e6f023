//! Eligibility selection: which targets should get a job on this tick.
//!
//! The predicate itself (subscription windows, pending articles, ...) lives in
//! the selector implementations. [`ActiveJobFilter`] wraps any selector and
//! drops targets that already have a live job, so one cron run never
//! double-schedules. A `pending` job older than the stale threshold does not
//! count as live; its target is selected again on the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::job::{JobType, NewJob};
use super::job_store::JobStore;

/// An eligible unit of work that is not yet a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub job_type: JobType,
    pub target_id: String,
    pub product_id: String,
}

impl Candidate {
    pub fn new(job_type: JobType, target_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            job_type,
            target_id: target_id.into(),
            product_id: product_id.into(),
        }
    }
}

impl From<Candidate> for NewJob {
    fn from(candidate: Candidate) -> Self {
        NewJob {
            job_type: candidate.job_type,
            target_id: candidate.target_id,
            product_id: candidate.product_id,
        }
    }
}

/// Source of candidates for a cron tick.
#[async_trait]
pub trait EligibilitySelector: Send + Sync {
    async fn select(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>>;
}

#[async_trait]
impl<S: EligibilitySelector + ?Sized> EligibilitySelector for Arc<S> {
    async fn select(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        (**self).select(now).await
    }
}

/// Selector returning a fixed list. Handy for one-off runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSelector {
    candidates: Vec<Candidate>,
}

impl StaticSelector {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl EligibilitySelector for StaticSelector {
    async fn select(&self, _now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        Ok(self.candidates.clone())
    }
}

/// Drops candidates whose target already has a live job, and duplicates.
pub struct ActiveJobFilter<S> {
    inner: S,
    store: Arc<dyn JobStore>,
    stale_after: Duration,
}

impl<S: EligibilitySelector> ActiveJobFilter<S> {
    pub fn new(inner: S, store: Arc<dyn JobStore>, stale_after: Duration) -> Self {
        Self {
            inner,
            store,
            stale_after,
        }
    }
}

#[async_trait]
impl<S: EligibilitySelector> EligibilitySelector for ActiveJobFilter<S> {
    async fn select(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        let candidates = self.inner.select(now).await?;

        let mut targets_by_type: HashMap<JobType, Vec<String>> = HashMap::new();
        for candidate in &candidates {
            targets_by_type
                .entry(candidate.job_type)
                .or_default()
                .push(candidate.target_id.clone());
        }

        let mut blocked: HashSet<(JobType, String)> = HashSet::new();
        for (job_type, target_ids) in targets_by_type {
            let active = self.store.find_active_for_targets(job_type, &target_ids).await?;
            blocked.extend(
                active
                    .into_iter()
                    .filter(|job| job.blocks_reselection(self.stale_after, now))
                    .map(|job| (job.job_type, job.target_id)),
            );
        }

        let total = candidates.len();
        let mut seen = HashSet::new();
        let eligible: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                let key = (c.job_type, c.target_id.clone());
                !blocked.contains(&key) && seen.insert(key)
            })
            .collect();

        debug!(
            selected = total,
            eligible = eligible.len(),
            blocked = blocked.len(),
            "filtered candidates with live jobs"
        );

        Ok(eligible)
    }
}
