//! In-memory application wiring for tests that do not need Postgres or NATS.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use dispatch_core::config::DispatchConfig;
use dispatch_core::kernel::jobs::testing::TestJobStore;
use dispatch_core::kernel::jobs::{Candidate, JobRegistry, JobType, StaticSelector};
use dispatch_core::kernel::{MessageQueue, QueueMessage, ServerDeps, TestQueue};
use dispatch_core::server::{build_app, RouterConfig};
use serde_json::Value;
use tower::ServiceExt;

pub const QUEUE_SECRET: &str = "queue-secret";
pub const CRON_SECRET: &str = "cron-secret";
pub const QUEUE_NAME: &str = "job-queue";

/// Install a test log writer once. Run with `RUST_LOG=debug` to see output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn dispatch_config() -> DispatchConfig {
    DispatchConfig::new("http://runner.test")
}

/// `count` content-planner candidates for products `product-0..`.
pub fn planner_candidates(count: usize) -> Vec<Candidate> {
    (0..count)
        .map(|i| {
            let product = format!("product-{}", i);
            Candidate::new(JobType::ContentPlanner, product.clone(), product)
        })
        .collect()
}

/// Test application: in-memory store and queue behind the real router.
pub struct TestApp {
    pub store: Arc<TestJobStore>,
    pub queue: Arc<TestQueue>,
    pub deps: ServerDeps,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_queue(TestQueue::new())
    }

    pub fn with_queue(queue: TestQueue) -> Self {
        Self::with_parts(queue, JobRegistry::new())
    }

    pub fn with_registry(registry: JobRegistry) -> Self {
        Self::with_parts(TestQueue::new(), registry)
    }

    pub fn with_parts(queue: TestQueue, registry: JobRegistry) -> Self {
        init_tracing();
        let store = Arc::new(TestJobStore::new());
        let queue = queue.into_shared();
        let deps = ServerDeps::new(
            store.clone(),
            queue.clone(),
            Arc::new(registry),
            dispatch_config(),
        );
        Self { store, queue, deps }
    }

    /// Register a fixed candidate list for a job type.
    pub fn with_candidates(mut self, job_type: JobType, candidates: Vec<Candidate>) -> Self {
        self.deps = self
            .deps
            .with_selector(job_type, StaticSelector::new(candidates));
        self
    }

    pub fn router(&self) -> Router {
        build_app(
            self.deps.clone(),
            RouterConfig {
                queue_name: QUEUE_NAME.to_string(),
                queue_secret: QUEUE_SECRET.to_string(),
                cron_secret: CRON_SECRET.to_string(),
            },
        )
    }

    /// Send one request through a fresh router and decode the JSON response.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

pub fn post_json(uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// Queue that holds each publish for `delay` and records peak concurrency.
pub struct SlowQueue {
    inner: TestQueue,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: TestQueue::new(),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.inner.publish_count()
    }
}

#[async_trait]
impl MessageQueue for SlowQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let result = self.inner.publish(message).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
