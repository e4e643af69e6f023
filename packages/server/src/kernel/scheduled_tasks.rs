//! Cron ticks: select eligible work and fan it out to the queue.
//!
//! A tick can be triggered three ways, all going through [`run_cron_tick`]:
//! - `GET /api/cron/{job-type}` from an external scheduler
//! - the in-process scheduler started by [`start_scheduler`]
//! - the `cron_tick` binary
//!
//! ```text
//! tick(job_type)
//!     │
//!     ├─► selector.select(now)     (fails: whole tick fails, nothing enqueued)
//!     └─► EnqueueFanout.run()      (per-candidate outcomes)
//!             └─► CronReport {success, timestamp, summary, results}
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use super::deps::ServerDeps;
use super::jobs::{EnqueueFailure, EnqueuedJob, FanoutReport, FanoutSummary, JobType};
use crate::config::CronSchedule;

/// Run one tick for a job type.
pub async fn run_cron_tick(deps: &ServerDeps, job_type: JobType) -> Result<FanoutReport> {
    let selector = deps
        .selector(job_type)
        .ok_or_else(|| anyhow!("no selector configured for {}", job_type))?;

    let candidates = selector
        .select(Utc::now())
        .await
        .with_context(|| format!("failed to select {} candidates", job_type))?;

    info!(job_type = %job_type, candidates = candidates.len(), "cron tick selected candidates");

    Ok(deps.fanout().run(candidates).await)
}

/// Response body of a completed tick.
#[derive(Debug, Clone, Serialize)]
pub struct CronReport {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub summary: FanoutSummary,
    pub results: CronResults,
}

#[derive(Debug, Clone, Serialize)]
pub struct CronResults {
    pub successful: Vec<EnqueuedJob>,
    pub failed: Vec<EnqueueFailure>,
}

/// How a tick went overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Every candidate was enqueued (or there were none).
    Complete,
    /// At least one candidate failed after per-item work started.
    Partial,
}

impl CronReport {
    pub fn new(report: &FanoutReport) -> Self {
        Self {
            success: !report.has_failures(),
            timestamp: Utc::now(),
            summary: report.summary(),
            results: CronResults {
                successful: report.successful(),
                failed: report.failed(),
            },
        }
    }

    pub fn status(&self) -> TickStatus {
        if self.summary.failed == 0 {
            TickStatus::Complete
        } else {
            TickStatus::Partial
        }
    }
}

/// Start the in-process scheduler for the configured job types.
pub async fn start_scheduler(deps: ServerDeps, schedules: &[CronSchedule]) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    for schedule in schedules {
        let job_type = schedule.job_type;
        let tick_deps = deps.clone();
        let job = Job::new_async(schedule.expression.as_str(), move |_uuid, _lock| {
            let deps = tick_deps.clone();
            Box::pin(async move {
                match run_cron_tick(&deps, job_type).await {
                    Ok(report) => {
                        let summary = report.summary();
                        info!(
                            job_type = %job_type,
                            total = summary.total,
                            successful = summary.successful,
                            failed = summary.failed,
                            "scheduled tick complete"
                        );
                    }
                    Err(e) => error!(job_type = %job_type, error = %e, "scheduled tick failed"),
                }
            })
        })
        .with_context(|| format!("invalid cron expression for {}: {}", job_type, schedule.expression))?;

        scheduler.add(job).await?;
        info!(job_type = %job_type, expression = %schedule.expression, "scheduled cron tick");
    }

    scheduler.start().await?;
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::EnqueueOutcome;
    use uuid::Uuid;

    fn enqueued(target: &str) -> EnqueueOutcome {
        Ok(EnqueuedJob {
            job_id: Uuid::new_v4(),
            job_type: JobType::ArticleGeneration,
            target_id: target.into(),
            product_id: "p1".into(),
        })
    }

    fn failed(target: &str) -> EnqueueOutcome {
        Err(EnqueueFailure {
            job_type: JobType::ArticleGeneration,
            target_id: target.into(),
            product_id: "p1".into(),
            job_id: None,
            error: "boom".into(),
        })
    }

    #[test]
    fn test_tick_status() {
        let empty = CronReport::new(&FanoutReport { outcomes: vec![] });
        assert_eq!(empty.status(), TickStatus::Complete);
        assert!(empty.success);

        let partial = CronReport::new(&FanoutReport {
            outcomes: vec![enqueued("a"), failed("b")],
        });
        assert_eq!(partial.status(), TickStatus::Partial);
        assert!(!partial.success);

        let all_failed = CronReport::new(&FanoutReport {
            outcomes: vec![failed("a"), failed("b")],
        });
        assert_eq!(all_failed.status(), TickStatus::Partial);
        assert!(!all_failed.success);
    }

    #[test]
    fn test_report_shape() {
        let report = CronReport::new(&FanoutReport {
            outcomes: vec![enqueued("a"), failed("b")],
        });
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["summary"]["total"], 2);
        assert_eq!(value["summary"]["successful"], 1);
        assert_eq!(value["summary"]["failed"], 1);
        assert_eq!(value["results"]["successful"][0]["targetId"], "a");
        assert_eq!(value["results"]["failed"][0]["error"], "boom");
    }
}
