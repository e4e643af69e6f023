//! Application setup and server configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::domains::content::{
    register_content_handlers, ArticleGenerationSelector, ContentPlannerSelector,
};
use crate::kernel::jobs::{JobRegistry, JobType, PostgresJobStore};
use crate::kernel::{JetStreamQueue, ServerDeps};
use crate::server::middleware::bearer_auth_middleware;
use crate::server::routes::{
    active_job_handler, cron_handler, enqueue_handler, get_job_handler, health_handler,
    run_job_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub deps: Arc<ServerDeps>,
}

/// Route-level settings that are not part of [`ServerDeps`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Ingress is served at `/api/<queue_name>`.
    pub queue_name: String,
    pub queue_secret: String,
    pub cron_secret: String,
}

impl From<&Config> for RouterConfig {
    fn from(config: &Config) -> Self {
        Self {
            queue_name: config.queue.name.clone(),
            queue_secret: config.queue_secret.clone(),
            cron_secret: config.cron_secret.clone(),
        }
    }
}

/// Connect to Postgres.
pub async fn connect_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("Failed to connect to database")
}

/// Wire the production dependencies: Postgres store, JetStream queue, SQL
/// selectors and the configured webhook handlers.
pub async fn build_server_deps(pool: PgPool, config: &Config) -> Result<ServerDeps> {
    let queue = JetStreamQueue::connect(config.queue.clone())
        .await
        .context("Failed to connect to queue")?;

    let mut registry = JobRegistry::new();
    register_content_handlers(
        &mut registry,
        &config.handler_urls,
        config.queue.dispatch_timeout,
    )?;

    let deps = ServerDeps::new(
        Arc::new(PostgresJobStore::new(pool.clone())),
        Arc::new(queue),
        Arc::new(registry),
        config.dispatch.clone(),
    )
    .with_selector(
        JobType::ContentPlanner,
        ContentPlannerSelector::new(pool.clone()),
    )
    .with_selector(
        JobType::ArticleGeneration,
        ArticleGenerationSelector::new(pool),
    );

    Ok(deps)
}

/// Build the Axum application router
///
/// Queue-facing routes (ingress, runner) require the queue secret; cron
/// routes require the cron secret. Health and job state are open.
pub fn build_app(deps: ServerDeps, config: RouterConfig) -> Router {
    let app_state = AxumAppState {
        deps: Arc::new(deps),
    };

    let queue_secret: Arc<str> = Arc::from(config.queue_secret);
    let cron_secret: Arc<str> = Arc::from(config.cron_secret);

    let queue_routes = Router::new()
        .route(&format!("/api/{}", config.queue_name), post(enqueue_handler))
        .route("/api/jobs/run", post(run_job_handler))
        .route_layer(middleware::from_fn(move |req, next| {
            bearer_auth_middleware(queue_secret.clone(), req, next)
        }));

    let cron_routes = Router::new()
        .route("/api/cron/:job_type", get(cron_handler))
        .route_layer(middleware::from_fn(move |req, next| {
            bearer_auth_middleware(cron_secret.clone(), req, next)
        }));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/jobs/active", get(active_job_handler))
        .route("/api/jobs/:id", get(get_job_handler))
        .merge(queue_routes)
        .merge(cron_routes)
        .layer(Extension(app_state))
        .layer(TraceLayer::new_for_http())
}
