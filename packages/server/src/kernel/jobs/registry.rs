//! Job registry mapping job types to their handlers.
//!
//! Handlers are opaque async functions over a [`Job`]. The runner looks a
//! handler up by the job's type and never needs to know what it does.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;

use super::job::{Job, JobType};

/// Type alias for the async handler function.
type BoxedHandler =
    Arc<dyn Fn(Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Registry that maps job types to handlers.
///
/// # Example
///
/// ```ignore
/// let mut registry = JobRegistry::new();
/// registry.register(JobType::ContentPlanner, move |job| {
///     let planner = planner.clone();
///     async move { planner.plan(&job.product_id).await }
/// });
/// ```
#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: HashMap<JobType, BoxedHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job type, replacing any previous one.
    pub fn register<F, Fut>(&mut self, job_type: JobType, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: BoxedHandler = Arc::new(move |job| Box::pin(handler(job)));
        self.handlers.insert(job_type, boxed);
    }

    /// Start the handler for a job, or `None` if the type has no handler.
    ///
    /// The returned future is `'static` so the runner can spawn it.
    pub fn handle(
        &self,
        job: Job,
    ) -> Option<Pin<Box<dyn Future<Output = Result<()>> + Send>>> {
        let handler = self.handlers.get(&job.job_type)?;
        Some(handler(job))
    }

    pub fn is_registered(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;
