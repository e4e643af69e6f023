//! Durable storage for job lifecycle records.
//!
//! Every status transition is a single conditional `UPDATE ... WHERE status = ...`
//! keyed by job id. A transition attempted from the wrong state affects zero
//! rows and is reported back as `false` rather than overwriting the row.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{ActiveJobQuery, ClaimOutcome, Job, JobStatus, JobType, NewJob};

/// Storage operations for jobs.
///
/// Implementations must keep transitions monotonic:
/// `pending -> running -> {done | error}` plus `pending -> error`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `pending`.
    async fn create(&self, new_job: NewJob) -> Result<Job>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>>;

    /// Compare-and-swap `pending -> running`.
    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome>;

    /// `running -> done`. Returns whether the row changed.
    async fn complete(&self, id: Uuid) -> Result<bool>;

    /// `pending | running -> error`. Returns whether the row changed.
    async fn fail(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Pending and running jobs matching the query, newest first.
    async fn find_active(&self, query: &ActiveJobQuery) -> Result<Vec<Job>>;

    /// Active jobs of one type for any of the given targets.
    async fn find_active_for_targets(
        &self,
        job_type: JobType,
        target_ids: &[String],
    ) -> Result<Vec<Job>>;

    /// Round-trip to the backing store.
    async fn health_check(&self) -> Result<()>;
}

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job> {
        let job = Job::from_new(new_job);

        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, job_type, status, target_id, product_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, job_type, status, target_id, product_id, error, created_at, updated_at
            "#,
        )
        .bind(job.id)
        .bind(job.job_type)
        .bind(job.status)
        .bind(&job.target_id)
        .bind(&job.product_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, status, target_id, product_id, error, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome> {
        let claimed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'running',
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING id, job_type, status, target_id, product_id, error, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(job) = claimed {
            return Ok(ClaimOutcome::Claimed(job));
        }

        // Lost the race or never pending: report what is there now
        let status = sqlx::query_scalar::<_, JobStatus>("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match status {
            Some(status) => ClaimOutcome::AlreadyClaimed(status),
            None => ClaimOutcome::NotFound,
        })
    }

    async fn complete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'done',
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'error',
                error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_active(&self, query: &ActiveJobQuery) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, status, target_id, product_id, error, created_at, updated_at
            FROM jobs
            WHERE status IN ('pending', 'running')
              AND ($1::job_type IS NULL OR job_type = $1)
              AND ($2::text IS NULL OR target_id = $2)
              AND ($3::text IS NULL OR product_id = $3)
            ORDER BY created_at DESC
            "#,
        )
        .bind(query.job_type)
        .bind(query.target_id.as_deref())
        .bind(query.product_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn find_active_for_targets(
        &self,
        job_type: JobType,
        target_ids: &[String],
    ) -> Result<Vec<Job>> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }

        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, status, target_id, product_id, error, created_at, updated_at
            FROM jobs
            WHERE status IN ('pending', 'running')
              AND job_type = $1
              AND target_id = ANY($2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(job_type)
        .bind(target_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
