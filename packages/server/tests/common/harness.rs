//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is shared by every test in the binary; migrations
//! run once on first use. Tests isolate themselves by using fresh ids.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use dispatch_core::kernel::jobs::PostgresJobStore;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::init_tracing;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Test harness for Postgres-backed tests.
///
/// ```ignore
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &mut TestHarness) {
///     let job = ctx.store().create(new_job).await.unwrap();
/// }
/// ```
pub struct TestHarness {
    pub db_pool: PgPool,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;
        Ok(Self { db_pool })
    }

    pub fn store(&self) -> PostgresJobStore {
        PostgresJobStore::new(self.db_pool.clone())
    }

    /// Insert a product and return its id.
    pub async fn create_product(&self) -> String {
        let id = format!("product-{}", Uuid::new_v4());
        sqlx::query("INSERT INTO products (id, name) VALUES ($1, $2)")
            .bind(&id)
            .bind("Test product")
            .execute(&self.db_pool)
            .await
            .expect("Failed to create product");
        id
    }

    /// Give a product a subscription in `status` covering `[start, end)`.
    pub async fn create_subscription(
        &self,
        product_id: &str,
        status: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) {
        sqlx::query(
            "INSERT INTO subscriptions (product_id, status, current_period_start, current_period_end)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(product_id)
        .bind(status)
        .bind(start)
        .bind(end)
        .execute(&self.db_pool)
        .await
        .expect("Failed to create subscription");
    }

    /// Subscription in `status` covering now, +/- 30 days.
    pub async fn subscribe(&self, product_id: &str, status: &str) {
        let now = Utc::now();
        self.create_subscription(product_id, status, now - Duration::days(30), now + Duration::days(30))
            .await;
    }

    pub async fn create_article(&self, product_id: &str, status: &str) -> String {
        let id = format!("article-{}", Uuid::new_v4());
        sqlx::query("INSERT INTO articles (id, product_id, title, status) VALUES ($1, $2, $3, $4)")
            .bind(&id)
            .bind(product_id)
            .bind("Test article")
            .bind(status)
            .execute(&self.db_pool)
            .await
            .expect("Failed to create article");
        id
    }
}
