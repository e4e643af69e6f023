//! Job model for deferred content work.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ContentPlanner,
    ArticleGeneration,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::ContentPlanner, JobType::ArticleGeneration];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ContentPlanner => "content_planner",
            JobType::ArticleGeneration => "article_generation",
        }
    }

    /// URL form used by the cron routes (`content-planner`).
    pub fn slug(&self) -> &'static str {
        match self {
            JobType::ContentPlanner => "content-planner",
            JobType::ArticleGeneration => "article-generation",
        }
    }

    /// Parse either the snake_case name or the kebab-case slug.
    pub fn from_slug(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.slug() == value || t.as_str() == value)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_slug(s).ok_or_else(|| anyhow!("unknown job type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    /// Pending or running.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `pending -> error` exists only for jobs whose queue message could not
    /// be published.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    // Core identity
    pub job_type: JobType,
    pub target_id: String,
    pub product_id: String,

    // State
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default, setter(strip_option))]
    pub error: Option<String>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job from an insert request.
    pub fn from_new(new_job: NewJob) -> Self {
        Self::builder()
            .job_type(new_job.job_type)
            .target_id(new_job.target_id)
            .product_id(new_job.product_id)
            .build()
    }

    /// A pending job created before `now - threshold` that never started.
    ///
    /// Stale jobs no longer block their target from being selected again.
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.created_at < now - threshold
    }

    /// Active and not stale.
    pub fn blocks_reselection(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.status.is_active() && !self.is_stale(threshold, now)
    }
}

/// Insert request for a new job. The store assigns id, status and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub job_type: JobType,
    pub target_id: String,
    pub product_id: String,
}

/// Filter for the active-job view. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJobQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

impl ActiveJobQuery {
    pub fn for_target(job_type: JobType, target_id: impl Into<String>) -> Self {
        Self {
            job_type: Some(job_type),
            target_id: Some(target_id.into()),
            product_id: None,
        }
    }

    pub fn for_product(product_id: impl Into<String>) -> Self {
        Self {
            product_id: Some(product_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.job_type.map_or(true, |t| t == job.job_type)
            && self.target_id.as_ref().map_or(true, |t| *t == job.target_id)
            && self.product_id.as_ref().map_or(true, |p| *p == job.product_id)
    }
}

/// Result of the `pending -> running` compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller moved the job to running and owns its execution.
    Claimed(Job),
    /// Someone else already claimed it; the job is in the given status.
    AlreadyClaimed(JobStatus),
    NotFound,
}
