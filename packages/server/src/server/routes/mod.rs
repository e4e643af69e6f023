// HTTP routes
pub mod cron;
pub mod health;
pub mod jobs;
pub mod queue;

pub use cron::*;
pub use health::*;
pub use jobs::*;
pub use queue::*;
