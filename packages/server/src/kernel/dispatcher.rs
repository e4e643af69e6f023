//! Queue dispatcher: turns queued messages into authenticated HTTP callbacks.
//!
//! # Architecture
//!
//! ```text
//! QueueConsumer (JetStream pull consumer)
//!     │
//!     ├─► fetch batch (up to batch_size messages)
//!     ├─► decode {apiUrl, body}      (undecodable: terminated, never redelivered)
//!     ├─► QueueDispatcher.dispatch_batch()  - all POSTs of the batch at once
//!     └─► ack messages that got any HTTP response
//!         (transport failures stay un-acked; the queue redelivers after ack_wait)
//! ```
//!
//! The dispatcher does not look at response bodies. Whether the job itself
//! succeeded is recorded by the job runner, not here.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_nats::jetstream::{self, AckKind};
use futures::future::join_all;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::nats::{JetStreamQueue, QueueMessage};

/// Transport-level result of one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The callback answered, with any status.
    Delivered { status: u16 },
    /// No response (connection refused, timeout, DNS, ...).
    TransportFailed { error: String },
}

impl DispatchOutcome {
    /// Whether the queue message can be acknowledged.
    pub fn should_ack(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

/// Issues one authenticated POST per queue message.
#[derive(Clone)]
pub struct QueueDispatcher {
    client: reqwest::Client,
    bearer_token: String,
}

impl QueueDispatcher {
    pub fn new(bearer_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            bearer_token: bearer_token.into(),
        })
    }

    /// POST `message.body` to `message.api_url`.
    pub async fn dispatch(&self, message: &QueueMessage) -> DispatchOutcome {
        let result = self
            .client
            .post(&message.api_url)
            .bearer_auth(&self.bearer_token)
            .json(&message.body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(url = %message.api_url, status = status.as_u16(), "callback delivered");
                } else {
                    warn!(url = %message.api_url, status = status.as_u16(), "callback returned error status");
                }
                DispatchOutcome::Delivered {
                    status: status.as_u16(),
                }
            }
            Err(e) => {
                warn!(url = %message.api_url, error = %e, "callback transport failure");
                DispatchOutcome::TransportFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Dispatch a whole batch concurrently. Outcomes are in message order.
    pub async fn dispatch_batch(&self, messages: &[QueueMessage]) -> Vec<DispatchOutcome> {
        join_all(messages.iter().map(|message| self.dispatch(message))).await
    }
}

/// Long-running consumer that feeds JetStream batches to the dispatcher.
pub struct QueueConsumer {
    queue: JetStreamQueue,
    dispatcher: QueueDispatcher,
    shutdown: CancellationToken,
}

impl QueueConsumer {
    pub fn new(queue: JetStreamQueue, dispatcher: QueueDispatcher) -> Self {
        Self {
            queue,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel the returned token to stop the consumer after its current batch.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        let config = self.queue.config().clone();
        let consumer = self.queue.pull_consumer().await?;

        info!(
            stream = %config.stream_name(),
            consumer = %config.consumer_name,
            batch_size = config.batch_size,
            "queue consumer starting"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let batch = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                batch = consumer
                    .batch()
                    .max_messages(config.batch_size)
                    .expires(config.batch_expiry)
                    .messages() => batch,
            };

            let mut batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "failed to fetch batch");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let mut deliveries = Vec::new();
            while let Some(item) = batch.next().await {
                match item {
                    Ok(delivery) => deliveries.push(delivery),
                    Err(e) => warn!(error = %e, "error while receiving batch"),
                }
            }

            if deliveries.is_empty() {
                continue;
            }

            debug!(count = deliveries.len(), "received batch");
            self.process_batch(deliveries).await;
        }

        info!("queue consumer stopped");
        Ok(())
    }

    /// Run until Ctrl+C.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_handle();

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.cancel();
        });

        self.run().await
    }

    async fn process_batch(&self, deliveries: Vec<jetstream::Message>) {
        let mut decoded = Vec::with_capacity(deliveries.len());

        for delivery in deliveries {
            match QueueMessage::from_slice(&delivery.payload) {
                Ok(message) => decoded.push((delivery, message)),
                Err(e) => {
                    // Redelivering a payload we cannot read would never succeed
                    warn!(subject = %delivery.subject, error = %e, "dropping undecodable message");
                    if let Err(e) = delivery.ack_with(AckKind::Term).await {
                        warn!(error = %e, "failed to terminate message");
                    }
                }
            }
        }

        let messages: Vec<QueueMessage> = decoded.iter().map(|(_, m)| m.clone()).collect();
        let outcomes = self.dispatcher.dispatch_batch(&messages).await;

        let mut acked = 0usize;
        for ((delivery, message), outcome) in decoded.into_iter().zip(outcomes) {
            if !outcome.should_ack() {
                debug!(url = %message.api_url, "leaving message for redelivery");
                continue;
            }
            match ack(&delivery).await {
                Ok(()) => acked += 1,
                Err(e) => warn!(url = %message.api_url, error = %e, "failed to ack message"),
            }
        }

        info!(received = messages.len(), acked, "batch dispatched");
    }
}

async fn ack(delivery: &jetstream::Message) -> Result<()> {
    delivery.ack().await.map_err(|e| anyhow!("{}", e))
}
