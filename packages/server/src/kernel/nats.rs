//! Durable message queue on NATS JetStream, plus a test double.
//!
//! Producers publish [`QueueMessage`]s (a callback URL plus a JSON body) to a
//! JetStream stream. The queue consumer pulls them in batches and hands them
//! to the dispatcher. Delivery is at-least-once: a message that is not acked
//! within the ack wait is redelivered, up to `max_deliver` times.

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, stream};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jobs::{Job, JobType};
use crate::config::QueueConfig;

/// One queued callback: POST `body` to `api_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub api_url: String,
    pub body: serde_json::Value,
}

impl QueueMessage {
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(serde_json::to_vec(self)?.into())
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("payload is not a queue message")
    }
}

/// Body carried to the job runner for a fanned-out job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessageBody {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub target_id: String,
    pub product_id: String,
}

impl From<&Job> for JobMessageBody {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            target_id: job.target_id.clone(),
            product_id: job.product_id.clone(),
        }
    }
}

/// Trait for queue publish operations.
///
/// This allows swapping between JetStream and test doubles.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publish a message and wait until the queue has persisted it.
    async fn publish(&self, message: &QueueMessage) -> Result<()>;
}

// ============================================================================
// JetStream
// ============================================================================

/// JetStream-backed queue.
#[derive(Clone)]
pub struct JetStreamQueue {
    context: jetstream::Context,
    config: QueueConfig,
}

impl JetStreamQueue {
    /// Connect to NATS and make sure the stream for this queue exists.
    pub async fn connect(config: QueueConfig) -> Result<Self> {
        let client = async_nats::connect(&config.nats_url)
            .await
            .with_context(|| format!("failed to connect to NATS at {}", config.nats_url))?;
        let context = jetstream::new(client);

        context
            .get_or_create_stream(stream::Config {
                name: config.stream_name(),
                subjects: vec![config.subject()],
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow!("failed to create stream {}: {}", config.stream_name(), e))?;

        Ok(Self { context, config })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Durable pull consumer shared by all queue consumer processes.
    pub async fn pull_consumer(&self) -> Result<jetstream::consumer::Consumer<pull::Config>> {
        let stream = self
            .context
            .get_stream(self.config.stream_name())
            .await
            .map_err(|e| anyhow!("failed to open stream {}: {}", self.config.stream_name(), e))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.config.consumer_name,
                pull::Config {
                    durable_name: Some(self.config.consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_deliver: self.config.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow!("failed to create consumer {}: {}", self.config.consumer_name, e))?;

        Ok(consumer)
    }
}

#[async_trait]
impl MessageQueue for JetStreamQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<()> {
        let ack = self
            .context
            .publish(self.config.subject(), message.to_bytes()?)
            .await
            .map_err(|e| anyhow!("failed to publish to {}: {}", self.config.subject(), e))?;

        ack.await
            .map_err(|e| anyhow!("queue did not acknowledge publish: {}", e))?;

        Ok(())
    }
}

// ============================================================================
// Test double
// ============================================================================

type FailurePredicate = Box<dyn Fn(&QueueMessage) -> bool + Send + Sync>;

/// Queue that records published messages for testing.
///
/// Optionally rejects messages matching a predicate, simulating a publish
/// failure for specific items.
#[derive(Default)]
pub struct TestQueue {
    published: RwLock<Vec<QueueMessage>>,
    fail_when: Option<FailurePredicate>,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message for which `predicate` returns true.
    pub fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&QueueMessage) -> bool + Send + Sync + 'static,
    {
        Self {
            published: RwLock::new(Vec::new()),
            fail_when: Some(Box::new(predicate)),
        }
    }

    /// Reject messages whose body targets `target_id`.
    pub fn failing_for_target(target_id: impl Into<String>) -> Self {
        let target_id = target_id.into();
        Self::failing_when(move |msg| msg.body["targetId"] == target_id.as_str())
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Get all published messages.
    pub fn published_messages(&self) -> Vec<QueueMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get the count of published messages.
    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Decode published bodies as job messages, skipping anything else.
    pub fn job_messages(&self) -> Vec<JobMessageBody> {
        self.published_messages()
            .into_iter()
            .filter_map(|m| serde_json::from_value(m.body).ok())
            .collect()
    }
}

#[async_trait]
impl MessageQueue for TestQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<()> {
        if self.fail_when.as_ref().is_some_and(|f| f(message)) {
            return Err(anyhow!("simulated publish failure"));
        }

        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}
