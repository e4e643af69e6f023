// Main entry point for the job API server

use anyhow::{Context, Result};
use dispatch_core::kernel::start_scheduler;
use dispatch_core::server::{build_app, build_server_deps, connect_pool, RouterConfig};
use dispatch_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatch_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting job dispatch API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = connect_pool(&config.database_url).await?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let deps = build_server_deps(pool, &config).await?;
    tracing::info!(queue = %config.queue.name, "Queue connected");

    // In-process cron ticks (optional; external schedulers use /api/cron/*)
    let _scheduler = if config.schedules.is_empty() {
        None
    } else {
        Some(start_scheduler(deps.clone(), &config.schedules).await?)
    };

    let app = build_app(deps, RouterConfig::from(&config));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}
