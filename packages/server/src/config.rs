use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::kernel::jobs::JobType;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    /// Bearer secret for queue ingress, consumer callbacks and the runner.
    pub queue_secret: String,
    /// Bearer secret for the cron routes.
    pub cron_secret: String,
    pub schedules: Vec<CronSchedule>,
    pub handler_urls: Vec<(JobType, String)>,
}

/// Queue connection and consumer settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub nats_url: String,
    /// Public queue name, also the ingress route (`/api/<name>`).
    pub name: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub batch_expiry: Duration,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    /// Timeout for each outbound callback.
    pub dispatch_timeout: Duration,
}

impl QueueConfig {
    /// JetStream stream names cannot contain dots or dashes.
    pub fn stream_name(&self) -> String {
        self.name
            .to_uppercase()
            .replace(|c: char| c == '-' || c == '.', "_")
    }

    pub fn subject(&self) -> String {
        format!("queues.{}", self.name)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            name: "job-queue".to_string(),
            consumer_name: "job-dispatcher".to_string(),
            batch_size: 10,
            batch_expiry: Duration::from_secs(5),
            ack_wait: Duration::from_secs(300),
            max_deliver: 5,
            dispatch_timeout: Duration::from_secs(60),
        }
    }
}

/// Settings the enqueue fan-out needs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Runner endpoint every job message is called back on.
    pub callback_url: String,
    /// Maximum candidates in flight at once.
    pub fanout_concurrency: usize,
    /// A pending job older than this no longer blocks re-selection.
    pub stale_pending_after: chrono::Duration,
}

impl DispatchConfig {
    pub fn new(callback_base_url: &str) -> Self {
        Self {
            callback_url: format!("{}/api/jobs/run", callback_base_url.trim_end_matches('/')),
            fanout_concurrency: 100,
            stale_pending_after: chrono::Duration::hours(1),
        }
    }
}

/// A cron expression driving one job type's fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    pub job_type: JobType,
    pub expression: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let port: u16 = parse_var("PORT", 8080)?;
        let queue_secret = env::var("QUEUE_SECRET").context("QUEUE_SECRET must be set")?;
        let callback_base_url = env::var("CALLBACK_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            nats_url: env::var("NATS_URL").unwrap_or(defaults.nats_url),
            name: env::var("QUEUE_NAME").unwrap_or(defaults.name),
            consumer_name: env::var("QUEUE_CONSUMER").unwrap_or(defaults.consumer_name),
            batch_size: parse_var("QUEUE_BATCH_SIZE", defaults.batch_size)?,
            batch_expiry: defaults.batch_expiry,
            ack_wait: Duration::from_secs(parse_var("QUEUE_ACK_WAIT_SECS", 300)?),
            max_deliver: parse_var("QUEUE_MAX_DELIVER", defaults.max_deliver)?,
            dispatch_timeout: Duration::from_secs(parse_var("DISPATCH_TIMEOUT_SECS", 60)?),
        };

        let mut dispatch = DispatchConfig::new(&callback_base_url);
        dispatch.fanout_concurrency = parse_var("FANOUT_CONCURRENCY", 100)?;
        dispatch.stale_pending_after =
            chrono::Duration::seconds(parse_var("STALE_PENDING_AFTER_SECS", 3600)?);

        let mut schedules = Vec::new();
        let mut handler_urls = Vec::new();
        for job_type in JobType::ALL {
            let prefix = job_type.as_str().to_uppercase();
            if let Ok(expression) = env::var(format!("{}_CRON", prefix)) {
                schedules.push(CronSchedule { job_type, expression });
            }
            if let Ok(url) = env::var(format!("{}_HANDLER_URL", prefix)) {
                handler_urls.push((job_type, url));
            }
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port,
            queue,
            dispatch,
            cron_secret: env::var("CRON_SECRET").unwrap_or_else(|_| queue_secret.clone()),
            queue_secret,
            schedules,
            handler_urls,
        })
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}
