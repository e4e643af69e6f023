//! SQL eligibility selectors for content jobs.
//!
//! A product is eligible while it has an `active` or `trialing` subscription
//! whose current period contains `now`. These selectors only express that
//! predicate; [`ServerDeps::with_selector`](crate::kernel::ServerDeps::with_selector)
//! wraps them so targets with a live job are dropped.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::jobs::{Candidate, EligibilitySelector, JobType};

const ENTITLED_SUBSCRIPTION: &str = r#"s.status IN ('active', 'trialing')
             AND s.current_period_start <= $1
             AND s.current_period_end > $1"#;

/// One content-planner run per entitled product.
pub struct ContentPlannerSelector {
    pool: PgPool,
}

impl ContentPlannerSelector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ProductRow {
    product_id: String,
}

#[async_trait]
impl EligibilitySelector for ContentPlannerSelector {
    async fn select(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        let q = format!(
            r#"SELECT DISTINCT p.id AS product_id
             FROM products p
             JOIN subscriptions s ON s.product_id = p.id
             WHERE {}
             ORDER BY p.id"#,
            ENTITLED_SUBSCRIPTION
        );
        let rows = sqlx::query_as::<_, ProductRow>(&q)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Candidate::new(JobType::ContentPlanner, row.product_id.clone(), row.product_id))
            .collect())
    }
}

/// One article-generation run per pending article of an entitled product.
pub struct ArticleGenerationSelector {
    pool: PgPool,
}

impl ArticleGenerationSelector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ArticleRow {
    article_id: String,
    product_id: String,
}

#[async_trait]
impl EligibilitySelector for ArticleGenerationSelector {
    async fn select(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        let q = format!(
            r#"SELECT a.id AS article_id, a.product_id
             FROM articles a
             WHERE a.status = 'pending'
               AND EXISTS (
                   SELECT 1 FROM subscriptions s
                   WHERE s.product_id = a.product_id
                     AND {}
               )
             ORDER BY a.created_at ASC"#,
            ENTITLED_SUBSCRIPTION
        );
        let rows = sqlx::query_as::<_, ArticleRow>(&q)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Candidate::new(JobType::ArticleGeneration, row.article_id, row.product_id))
            .collect())
    }
}
