use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, info, info_span, warn};

use super::{RateLimitedPoller, RelayError, RelayPipeline, ReplyStatus, WebhookClient};
use crate::core::chat::ChatService;
use crate::core::cursor::CursorStore;
use crate::core::retry::RetryConfig;
use crate::core::subscription::Subscription;

/// One subscription's relay loop: poll, relay each message in order,
/// advance the cursor after each success, sleep.
pub struct RelayWorker {
    poller: RateLimitedPoller,
    pipeline: RelayPipeline,
    poll_interval: Duration,
    room: String,
    masked_key: String,
}

impl RelayWorker {
    pub fn new(
        subscription: &Subscription,
        chat: Arc<dyn ChatService>,
        store: CursorStore,
    ) -> anyhow::Result<Self> {
        let webhook = WebhookClient::new(subscription.target_url())?;
        Ok(Self {
            poller: RateLimitedPoller::new(chat.clone(), store, subscription.room_id()),
            pipeline: RelayPipeline::new(
                chat,
                webhook,
                subscription.room_id(),
                subscription.sender(),
            ),
            poll_interval: subscription.poll_interval(),
            room: subscription.room_id().to_string(),
            masked_key: subscription.masked_api_key(),
        })
    }

    #[cfg(test)]
    pub fn with_retry(mut self, delivery: RetryConfig, backoff: RetryConfig) -> Self {
        self.poller = self.poller.with_retry(delivery, backoff);
        self.pipeline = self.pipeline.with_webhook_retry(delivery);
        self
    }

    #[cfg(test)]
    pub fn cursor(&self) -> Option<&str> {
        self.poller.cursor()
    }

    /// Runs until a fatal error. Never returns `Ok`.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let span = info_span!("relay", room = %self.room, api_key = %self.masked_key);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&mut self) -> Result<(), RelayError> {
        info!("Relay worker starting, polling every {:?}", self.poll_interval);
        self.poller.bootstrap().await?;
        loop {
            self.poll_once().await?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One poll cycle. Returns how many messages were relayed and committed.
    /// A delivery failure ends the cycle early with the cursor on the last
    /// committed message.
    pub async fn poll_once(&mut self) -> Result<usize, RelayError> {
        let batch = self.poller.next_batch().await?;
        let mut relayed = 0;
        for message in &batch {
            match self.pipeline.relay(message).await {
                Ok(outcome) => {
                    self.poller.advance(&message.id).await?;
                    relayed += 1;
                    if outcome.reply == ReplyStatus::Sent {
                        debug!("Reply for {} posted to room", message.id);
                    }
                }
                Err(e @ RelayError::Delivery { .. }) => {
                    warn!("{}; will retry on next poll", e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(relayed)
    }
}
