//! Webhook job handlers.
//!
//! The planning and generation work itself lives in other services. Each job
//! type can be bound to an HTTP endpoint that receives the job as JSON; a
//! non-2xx answer fails the job with the status and response text.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::kernel::jobs::{Job, JobRegistry, JobType};

/// Longest response excerpt kept in a job's error message.
const MAX_ERROR_BODY: usize = 500;

#[derive(Clone)]
pub struct WebhookHandler {
    client: reqwest::Client,
    url: Arc<str>,
}

impl WebhookHandler {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: Arc::from(url.into()),
        })
    }

    pub async fn call(&self, job: Job) -> Result<()> {
        debug!(job_id = %job.id, url = %self.url, "calling job webhook");

        let response = self
            .client
            .post(self.url.as_ref())
            .json(&job)
            .send()
            .await
            .with_context(|| format!("webhook request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
            bail!("webhook returned {}: {}", status, excerpt);
        }

        Ok(())
    }
}

/// Register a webhook handler for every configured job type.
pub fn register_content_handlers(
    registry: &mut JobRegistry,
    handler_urls: &[(JobType, String)],
    timeout: Duration,
) -> Result<()> {
    for (job_type, url) in handler_urls {
        let handler = WebhookHandler::new(url.clone(), timeout)?;
        registry.register(*job_type, move |job: Job| {
            let handler = handler.clone();
            async move { handler.call(job).await }
        });
        info!(job_type = %job_type, url = %url, "registered webhook handler");
    }
    Ok(())
}
