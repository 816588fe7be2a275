use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChatError, ChatMessage, ChatService, MessageFormat};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct HistoryPage {
    #[serde(default)]
    items: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct Notification<'a> {
    from: &'a str,
    message: &'a str,
    message_format: &'a str,
    notify: bool,
}

/// HipChat v2 REST client, authenticated with a room or user token.
pub struct HipChatClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl HipChatClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ChatError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn room_url(&self, room: &str, suffix: &str) -> String {
        format!(
            "{}/v2/room/{}{}",
            self.base_url,
            urlencoding::encode(room),
            suffix
        )
    }

    async fn fetch_items(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?;
        let body = check_status(res).await?.text().await?;
        let page: HistoryPage =
            serde_json::from_str(&body).map_err(|e| ChatError::Decode(e.to_string()))?;

        let total = page.items.len();
        let messages: Vec<ChatMessage> = page
            .items
            .into_iter()
            .filter(ChatMessage::is_user_message)
            .collect();
        debug!("Fetched {} items ({} messages) from {}", total, messages.len(), url);
        Ok(messages)
    }
}

async fn check_status(res: Response) -> Result<Response, ChatError> {
    let status = res.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = res
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ChatError::RateLimited { retry_after });
    }
    if !status.is_success() {
        return Err(ChatError::Status {
            status: status.as_u16(),
            body: res.text().await.unwrap_or_default(),
        });
    }
    Ok(res)
}

#[async_trait]
impl ChatService for HipChatClient {
    async fn history(&self, room: &str, max_results: u32) -> Result<Vec<ChatMessage>, ChatError> {
        self.fetch_items(
            self.room_url(room, "/history"),
            &[("max-results", max_results.to_string())],
        )
        .await
    }

    async fn recent_history(
        &self,
        room: &str,
        not_before: Option<&str>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let mut query = Vec::new();
        if let Some(id) = not_before {
            query.push(("not-before", id.to_string()));
        }
        self.fetch_items(self.room_url(room, "/history/latest"), &query)
            .await
    }

    async fn send(
        &self,
        room: &str,
        sender: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<(), ChatError> {
        let body = Notification {
            from: sender,
            message: text,
            message_format: format.as_str(),
            notify: false,
        };
        let res = self
            .client
            .post(self.room_url(room, "/notification"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }
}
