//! One-shot cron tick for external schedulers.
//!
//! Usage:
//!   cargo run --bin cron_tick -- content-planner
//!   cargo run --bin cron_tick -- article-generation --json
//!
//! Exits non-zero when the tick fails or any candidate could not be enqueued.

use anyhow::{Context, Result};
use clap::Parser;
use dispatch_core::kernel::jobs::JobType;
use dispatch_core::kernel::{run_cron_tick, CronReport, TickStatus};
use dispatch_core::server::{build_server_deps, connect_pool};
use dispatch_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cron_tick")]
#[command(about = "Select eligible work for a job type and enqueue it")]
struct Cli {
    /// Job type, e.g. `content-planner` or `article_generation`
    job_type: JobType,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatch_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = connect_pool(&config.database_url).await?;
    let deps = build_server_deps(pool, &config).await?;

    let report = CronReport::new(&run_cron_tick(&deps, cli.job_type).await?);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} total, {} enqueued, {} failed",
            cli.job_type, report.summary.total, report.summary.successful, report.summary.failed
        );
        for failure in &report.results.failed {
            println!("  failed: {}", failure);
        }
    }

    if report.status() != TickStatus::Complete {
        std::process::exit(1);
    }

    Ok(())
}
