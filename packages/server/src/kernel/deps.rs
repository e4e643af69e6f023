//! Server dependencies shared by the HTTP handlers, the scheduler and the
//! CLI binaries.
//!
//! Everything external sits behind a trait object so tests can swap in
//! [`TestJobStore`](crate::kernel::jobs::testing::TestJobStore) and
//! [`TestQueue`](crate::kernel::TestQueue).

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::kernel::jobs::{
    ActiveJobFilter, EligibilitySelector, EnqueueFanout, JobRunner, JobStore, JobType,
    SharedJobRegistry,
};
use crate::kernel::nats::MessageQueue;

#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub registry: SharedJobRegistry,
    pub dispatch: DispatchConfig,
    selectors: HashMap<JobType, Arc<dyn EligibilitySelector>>,
}

impl ServerDeps {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn MessageQueue>,
        registry: SharedJobRegistry,
        dispatch: DispatchConfig,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            dispatch,
            selectors: HashMap::new(),
        }
    }

    /// Register the selector for a job type.
    ///
    /// The selector is wrapped in an [`ActiveJobFilter`] over this store, so
    /// implementations only express eligibility, not deduplication.
    pub fn with_selector<S>(mut self, job_type: JobType, selector: S) -> Self
    where
        S: EligibilitySelector + 'static,
    {
        let filtered = ActiveJobFilter::new(
            selector,
            self.store.clone(),
            self.dispatch.stale_pending_after,
        );
        self.selectors.insert(job_type, Arc::new(filtered));
        self
    }

    pub fn selector(&self, job_type: JobType) -> Option<Arc<dyn EligibilitySelector>> {
        self.selectors.get(&job_type).cloned()
    }

    pub fn fanout(&self) -> EnqueueFanout {
        EnqueueFanout::new(self.store.clone(), self.queue.clone(), self.dispatch.clone())
    }

    pub fn runner(&self) -> JobRunner {
        JobRunner::new(self.store.clone(), self.registry.clone())
    }
}
