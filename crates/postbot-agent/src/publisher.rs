use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use postbot_core::{
    config::{PublisherConfig, PublisherMode},
    Credential, MediaBlob,
};
use postbot_scheduler::{PublishError, Publisher};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::AgentError;

/// Pretends to publish: waits, logs, succeeds.
pub struct SimulatedPublisher {
    delay: Duration,
}

impl SimulatedPublisher {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Publisher for SimulatedPublisher {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn publish(
        &self,
        caption: &str,
        media: &MediaBlob,
        credential: &Credential,
    ) -> Result<(), PublishError> {
        if credential.is_empty() {
            return Err(PublishError::new("missing access token"));
        }
        tokio::time::sleep(self.delay).await;
        info!(
            caption,
            mime_type = %media.mime_type,
            size = media.len(),
            "simulated publish complete"
        );
        Ok(())
    }
}

/// POSTs the finished post as JSON to a fixed endpoint, authenticated with
/// the post's credential as a bearer token.
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    caption: &'a str,
    mime_type: &'a str,
    media_base64: String,
}

impl WebhookPublisher {
    pub fn new(url: String, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(
        &self,
        caption: &str,
        media: &MediaBlob,
        credential: &Credential,
    ) -> Result<(), PublishError> {
        let body = WebhookBody {
            caption,
            mime_type: &media.mime_type,
            media_base64: base64::engine::general_purpose::STANDARD.encode(&media.bytes),
        };
        debug!(url = %self.url, size = media.len(), "publishing via webhook");

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::new(format!("network: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "publish endpoint rejected post");
            return Err(PublishError::new(format!(
                "publish endpoint returned {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

/// Build the configured publisher.
pub fn build_publisher(config: &PublisherConfig) -> Result<Arc<dyn Publisher>, AgentError> {
    match config.mode {
        PublisherMode::Simulated => {
            info!(delay_ms = config.delay_ms, "publisher: simulated");
            Ok(Arc::new(SimulatedPublisher::new(Duration::from_millis(
                config.delay_ms,
            ))))
        }
        PublisherMode::Webhook => {
            let url = config
                .webhook_url
                .clone()
                .filter(|u| !u.is_empty())
                .ok_or(AgentError::MissingWebhookUrl)?;
            info!(url = %url, "publisher: webhook");
            Ok(Arc::new(WebhookPublisher::new(
                url,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}
