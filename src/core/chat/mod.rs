mod hipchat;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::retry::RetryHint;

pub use hipchat::HipChatClient;

pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.hipchat.com";

/// A room message as the chat service reports it. Ids are opaque ordering
/// tokens and are never parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub message: String,
    /// A plain name or a user object, depending on how the message was posted.
    #[serde(default)]
    pub from: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "message".to_string()
}

impl ChatMessage {
    pub fn is_user_message(&self) -> bool {
        self.kind == "message"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Text,
    Html,
}

impl MessageFormat {
    /// Unknown formats fall back to plain text.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("html") {
            MessageFormat::Html
        } else {
            MessageFormat::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Text => "text",
            MessageFormat::Html => "html",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("rate limited by chat service")]
    RateLimited { retry_after: Option<Duration> },
    #[error("chat service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected chat service response: {0}")]
    Decode(String),
}

impl ChatError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ChatError::RateLimited { .. })
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::Transport(_) => true,
            ChatError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl RetryHint for ChatError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            ChatError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[async_trait]
pub trait ChatService: Send + Sync {
    /// The last `max_results` messages of the room, oldest first.
    async fn history(&self, room: &str, max_results: u32) -> Result<Vec<ChatMessage>, ChatError>;

    /// Messages from `not_before` onwards, oldest first. The boundary message
    /// itself is included as the first element.
    async fn recent_history(
        &self,
        room: &str,
        not_before: Option<&str>,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn send(
        &self,
        room: &str,
        sender: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<(), ChatError>;
}
