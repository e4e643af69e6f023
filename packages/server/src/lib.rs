// Job Dispatch - Core
//
// Cron-driven job orchestration: eligible work is materialized as jobs,
// published to a durable queue, called back over authenticated HTTP and run
// exactly once per job by a stateless runner.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
