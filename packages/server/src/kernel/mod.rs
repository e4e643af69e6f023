//! Kernel module - job orchestration infrastructure and dependencies.

pub mod deps;
pub mod dispatcher;
pub mod jobs;
pub mod nats;
pub mod scheduled_tasks;

pub use deps::ServerDeps;
pub use dispatcher::{DispatchOutcome, QueueConsumer, QueueDispatcher};
pub use nats::{JetStreamQueue, JobMessageBody, MessageQueue, QueueMessage, TestQueue};
pub use scheduled_tasks::{run_cron_tick, start_scheduler, CronReport, TickStatus};
