use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

use super::RelayError;
use crate::core::chat::{ChatMessage, ChatService, MessageFormat};
use crate::core::retry::{RetryConfig, RetryError, RetryHint, retry};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("webhook unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RetryHint for WebhookError {}

/// Reply document returned by the webhook. Both the short and the
/// `reply_`-prefixed field names are accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookReply {
    #[serde(alias = "reply_text")]
    pub message: String,
    #[serde(default, alias = "reply_format")]
    pub format: Option<String>,
}

impl WebhookReply {
    /// `None` when the body carries nothing worth echoing.
    pub fn parse(body: &str) -> Option<Self> {
        if body.trim().is_empty() {
            return None;
        }
        serde_json::from_str::<Self>(body)
            .ok()
            .filter(|reply| !reply.message.trim().is_empty())
    }

    pub fn format(&self) -> MessageFormat {
        self.format
            .as_deref()
            .map(MessageFormat::parse)
            .unwrap_or_default()
    }
}

pub struct WebhookClient {
    client: Client,
    target_url: String,
    retry: RetryConfig,
}

impl WebhookClient {
    pub fn new(target_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            target_url: target_url.to_string(),
            retry: RetryConfig::DELIVERY,
        })
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// POSTs the message until the webhook answers 2xx and returns the body.
    pub async fn deliver(&self, message: &ChatMessage) -> Result<String, RetryError<WebhookError>> {
        retry(self.retry, |_: &WebhookError| true, || self.post_once(message)).await
    }

    async fn post_once(&self, message: &ChatMessage) -> Result<String, WebhookError> {
        let res = self.client.post(&self.target_url).json(message).send().await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Sent,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub reply: ReplyStatus,
}

pub struct RelayPipeline {
    chat: Arc<dyn ChatService>,
    webhook: WebhookClient,
    room: String,
    sender: String,
}

impl RelayPipeline {
    pub fn new(chat: Arc<dyn ChatService>, webhook: WebhookClient, room: &str, sender: &str) -> Self {
        Self {
            chat,
            webhook,
            room: room.to_string(),
            sender: sender.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_webhook_retry(mut self, retry: RetryConfig) -> Self {
        self.webhook.retry = retry;
        self
    }

    /// Delivers one message and echoes the webhook's reply into the room.
    /// Only a failed delivery is an error; a failed echo is reported in the
    /// outcome since the webhook has already consumed the message.
    pub async fn relay(&self, message: &ChatMessage) -> Result<RelayOutcome, RelayError> {
        let body = self.webhook.deliver(message).await.map_err(|e| {
            let attempts = match &e {
                RetryError::Exhausted { attempts, .. } => *attempts,
                RetryError::Aborted(_) => 1,
            };
            RelayError::Delivery {
                message_id: message.id.clone(),
                attempts,
                source: e.into_inner(),
            }
        })?;
        info!("Delivered message {} to webhook", message.id);

        let Some(reply) = WebhookReply::parse(&body) else {
            debug!("Webhook sent no reply for message {}", message.id);
            return Ok(RelayOutcome {
                reply: ReplyStatus::Skipped,
            });
        };

        let reply_status = match self
            .chat
            .send(&self.room, &self.sender, &reply.message, reply.format())
            .await
        {
            Ok(()) => ReplyStatus::Sent,
            Err(e) => {
                error!("Failed to echo webhook reply for message {}: {}", message.id, e);
                ReplyStatus::Failed
            }
        };
        Ok(RelayOutcome {
            reply: reply_status,
        })
    }
}
