//! Queue consumer: pulls job messages from JetStream and calls them back.
//!
//! Runs separately from the API server so callbacks keep flowing while the
//! server restarts, and vice versa.

use anyhow::{Context, Result};
use dispatch_core::kernel::{JetStreamQueue, QueueConsumer, QueueDispatcher};
use dispatch_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatch_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let queue = JetStreamQueue::connect(config.queue.clone())
        .await
        .context("Failed to connect to queue")?;
    let dispatcher = QueueDispatcher::new(config.queue_secret.clone(), config.queue.dispatch_timeout)?;

    QueueConsumer::new(queue, dispatcher)
        .run_until_shutdown()
        .await
}
