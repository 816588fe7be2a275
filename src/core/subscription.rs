use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Marker label carried by every worker this system creates.
pub const MARKER_LABEL: &str = "roombridge.managed";
const LABEL_API_KEY: &str = "roombridge.api_key";
const LABEL_ROOM_ID: &str = "roombridge.room_id";
const LABEL_SENDER: &str = "roombridge.sender";
const LABEL_TARGET_URL: &str = "roombridge.target_url";
const LABEL_POLL_INTERVAL: &str = "roombridge.poll_interval_secs";

pub const ENV_API_KEY: &str = "BRIDGE_API_KEY";
pub const ENV_ROOM_ID: &str = "BRIDGE_ROOM_ID";
pub const ENV_SENDER: &str = "BRIDGE_SENDER";
pub const ENV_TARGET_URL: &str = "BRIDGE_TARGET_URL";
pub const ENV_POLL_INTERVAL: &str = "BRIDGE_POLL_INTERVAL_SECS";
/// Worker-only settings that are not part of a subscription's identity.
pub const ENV_CHAT_BASE_URL: &str = "BRIDGE_CHAT_BASE_URL";
pub const ENV_CURSOR_PATH: &str = "BRIDGE_CURSOR_PATH";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const MAX_POLL_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("target_url is not an absolute http(s) URL: {0}")]
    InvalidTargetUrl(String),
    #[error("poll_interval_secs must be between 1 and 3600, got {0}")]
    InvalidPollInterval(u64),
    #[error("poll_interval_secs is not a whole number of seconds: {0}")]
    UnparsablePollInterval(String),
}

/// Loosely typed subscription as it arrives from a request body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubscriptionRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default, alias = "room")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default, alias = "target")]
    pub target_url: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

/// One bridge between a chat room and a webhook. The full tuple is its identity.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    api_key: String,
    room_id: String,
    sender: String,
    target_url: String,
    poll_interval: Duration,
}

fn required(value: Option<&str>, field: &'static str) -> Result<String, SubscriptionError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(SubscriptionError::MissingField(field)),
    }
}

/// Shows only the tail of a secret, e.g. `…4f2a9`.
pub fn mask_secret(secret: &str) -> String {
    let tail: String = secret
        .chars()
        .rev()
        .take(5)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{}", tail)
}

impl Subscription {
    pub fn new(
        api_key: &str,
        room_id: &str,
        sender: &str,
        target_url: &str,
        poll_interval_secs: Option<u64>,
    ) -> Result<Self, SubscriptionError> {
        let api_key = required(Some(api_key), "api_key")?;
        let room_id = required(Some(room_id), "room_id")?;
        let sender = required(Some(sender), "sender")?;
        let target_url = required(Some(target_url), "target_url")?;

        match url::Url::parse(&target_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
            _ => return Err(SubscriptionError::InvalidTargetUrl(target_url)),
        }

        let secs = poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if !(1..=MAX_POLL_INTERVAL_SECS).contains(&secs) {
            return Err(SubscriptionError::InvalidPollInterval(secs));
        }

        Ok(Self {
            api_key,
            room_id,
            sender,
            target_url,
            poll_interval: Duration::from_secs(secs),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }

    /// Lowercase hex SHA-256 over the length-prefixed field tuple.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let secs = self.poll_interval.as_secs().to_string();
        for field in [
            self.api_key.as_str(),
            self.room_id.as_str(),
            self.sender.as_str(),
            self.target_url.as_str(),
            secs.as_str(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn worker_name(&self) -> String {
        format!("roombridge-{}", &self.fingerprint()[..16])
    }

    pub fn cursor_volume_name(&self) -> String {
        format!("roombridge-cursor-{}", &self.fingerprint()[..16])
    }

    pub fn to_tags(&self) -> HashMap<String, String> {
        HashMap::from([
            (MARKER_LABEL.to_string(), "true".to_string()),
            (LABEL_API_KEY.to_string(), self.api_key.clone()),
            (LABEL_ROOM_ID.to_string(), self.room_id.clone()),
            (LABEL_SENDER.to_string(), self.sender.clone()),
            (LABEL_TARGET_URL.to_string(), self.target_url.clone()),
            (
                LABEL_POLL_INTERVAL.to_string(),
                self.poll_interval.as_secs().to_string(),
            ),
        ])
    }

    /// Decodes a worker's labels. Foreign, partial or malformed tag sets yield `None`.
    pub fn decode_tags(labels: &HashMap<String, String>) -> Option<Self> {
        if labels.get(MARKER_LABEL).map(String::as_str) != Some("true") {
            return None;
        }
        let secs = labels.get(LABEL_POLL_INTERVAL)?.parse::<u64>().ok()?;
        Self::new(
            labels.get(LABEL_API_KEY)?,
            labels.get(LABEL_ROOM_ID)?,
            labels.get(LABEL_SENDER)?,
            labels.get(LABEL_TARGET_URL)?,
            Some(secs),
        )
        .ok()
    }

    pub fn to_env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_API_KEY.to_string(), self.api_key.clone()),
            (ENV_ROOM_ID.to_string(), self.room_id.clone()),
            (ENV_SENDER.to_string(), self.sender.clone()),
            (ENV_TARGET_URL.to_string(), self.target_url.clone()),
            (
                ENV_POLL_INTERVAL.to_string(),
                self.poll_interval.as_secs().to_string(),
            ),
        ]
    }

    /// Reads the worker configuration through a lookup such as `std::env::var`.
    pub fn from_env<F>(lookup: F) -> Result<Self, SubscriptionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let poll = match lookup(ENV_POLL_INTERVAL) {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| SubscriptionError::UnparsablePollInterval(raw.clone()))?,
            ),
            _ => None,
        };
        Self::new(
            &lookup(ENV_API_KEY).unwrap_or_default(),
            &lookup(ENV_ROOM_ID).unwrap_or_default(),
            &lookup(ENV_SENDER).unwrap_or_default(),
            &lookup(ENV_TARGET_URL).unwrap_or_default(),
            poll,
        )
    }

    pub fn to_masked_json(&self) -> serde_json::Value {
        serde_json::json!({
            "api_key": self.masked_api_key(),
            "room_id": self.room_id,
            "sender": self.sender,
            "target_url": self.target_url,
            "poll_interval_secs": self.poll_interval.as_secs(),
        })
    }
}

impl TryFrom<SubscriptionRequest> for Subscription {
    type Error = SubscriptionError;

    fn try_from(req: SubscriptionRequest) -> Result<Self, Self::Error> {
        let api_key = required(req.api_key.as_deref(), "api_key")?;
        let room_id = required(req.room_id.as_deref(), "room_id")?;
        let sender = required(req.sender.as_deref(), "sender")?;
        let target_url = required(req.target_url.as_deref(), "target_url")?;
        Self::new(
            &api_key,
            &room_id,
            &sender,
            &target_url,
            req.poll_interval_secs,
        )
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("api_key", &self.masked_api_key())
            .field("room_id", &self.room_id)
            .field("sender", &self.sender)
            .field("target_url", &self.target_url)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room {} -> {}", self.room_id, self.target_url)
    }
}

#[cfg(test)]
pub(crate) fn sample() -> Subscription {
    Subscription::new(
        "secret-token-12345",
        "ops",
        "Bridge Bot",
        "http://127.0.0.1:9999/hook",
        Some(5),
    )
    .unwrap()
}
