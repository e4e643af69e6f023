//! Job infrastructure for deferred content work.
//!
//! - [`JobStore`] / [`PostgresJobStore`] - durable job records and transitions
//! - [`EligibilitySelector`] / [`ActiveJobFilter`] - candidate selection
//! - [`EnqueueFanout`] - bounded-concurrency create + publish
//! - [`JobRunner`] / [`JobRegistry`] - execute one job, record its outcome
//! - [`JobWatcher`] - client-side completion detection
//!
//! # Architecture
//!
//! ```text
//! cron tick
//!     │
//!     └─► EligibilitySelector.select()  (ActiveJobFilter drops live targets)
//!             └─► EnqueueFanout.run()
//!                     ├─► JobStore.create()       (pending)
//!                     └─► MessageQueue.publish()  ({apiUrl, body: {jobId, ...}})
//!
//! queue consumer
//!     └─► QueueDispatcher: POST apiUrl (bearer) for each message of a batch
//!
//! POST /api/jobs/run
//!     └─► JobRunner.run_job()  (pending -> running -> done | error)
//!
//! JobWatcher ──polls──► GET /api/jobs/active
//! ```

mod fanout;
mod job;
mod job_store;
mod registry;
mod runner;
mod selector;
pub mod testing;
mod watcher;

pub use fanout::{EnqueueFailure, EnqueueFanout, EnqueueOutcome, EnqueuedJob, FanoutReport, FanoutSummary};
pub use job::{ActiveJobQuery, ClaimOutcome, Job, JobStatus, JobType, NewJob};
pub use job_store::{JobStore, PostgresJobStore};
pub use registry::{JobRegistry, SharedJobRegistry};
pub use runner::{JobRunner, RunJobError, RunOutcome};
pub use selector::{ActiveJobFilter, Candidate, EligibilitySelector, StaticSelector};
pub use watcher::{
    ActiveJobSource, CompletedJob, CompletionTracker, HttpActiveJobSource, JobWatcher,
    StoreActiveJobSource, WatchEnd, WatcherConfig,
};
