//! The worker side of a bridge: poll the room, forward each new message to
//! the webhook, echo the reply, and only then move the cursor.

mod pipeline;
mod poller;
mod worker;

pub use pipeline::{RelayPipeline, ReplyStatus, WebhookClient, WebhookError};
pub use poller::RateLimitedPoller;
pub use worker::RelayWorker;

use crate::core::chat::ChatError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Webhook delivery gave up. The cursor stays put and the message is
    /// fetched again on the next poll.
    #[error("delivery of message {message_id} failed after {attempts} attempts: {source}")]
    Delivery {
        message_id: String,
        attempts: u32,
        #[source]
        source: WebhookError,
    },
    #[error("chat service request failed: {0}")]
    Chat(#[from] ChatError),
    #[error("cursor store failure: {0:#}")]
    Cursor(anyhow::Error),
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Cursor(err)
    }
}
