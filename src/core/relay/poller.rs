use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::RelayError;
use crate::core::chat::{ChatError, ChatMessage, ChatService};
use crate::core::cursor::CursorStore;
use crate::core::retry::{RetryConfig, RetryError, retry};

/// How much room history is read to find the bootstrap position.
pub const HISTORY_WINDOW: u32 = 10;

/// Cursor-tracked reader of one room. Owns the only writer to its
/// [`CursorStore`].
pub struct RateLimitedPoller {
    chat: Arc<dyn ChatService>,
    store: CursorStore,
    room: String,
    cursor: Option<String>,
    transient: RetryConfig,
    backoff: RetryConfig,
}

impl RateLimitedPoller {
    pub fn new(chat: Arc<dyn ChatService>, store: CursorStore, room: &str) -> Self {
        Self {
            chat,
            store,
            room: room.to_string(),
            cursor: None,
            transient: RetryConfig::DELIVERY,
            backoff: RetryConfig::RATE_LIMIT,
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, transient: RetryConfig, backoff: RetryConfig) -> Self {
        self.transient = transient;
        self.backoff = backoff;
        self
    }

    #[cfg(test)]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Restores the persisted cursor, or seeds it with the newest message
    /// already in the room so history before startup is never replayed.
    pub async fn bootstrap(&mut self) -> Result<(), RelayError> {
        if let Some(saved) = self.store.get().await? {
            info!("Resuming from persisted cursor {}", saved);
            self.cursor = Some(saved);
            return Ok(());
        }

        let chat = &self.chat;
        let room = self.room.as_str();
        let recent = self
            .call_with_backoff(|| chat.history(room, HISTORY_WINDOW))
            .await?;

        match recent.last() {
            Some(latest) => {
                info!("Seeding cursor with latest room message {}", latest.id);
                let id = latest.id.clone();
                self.advance(&id).await?;
            }
            None => info!("Room is empty, starting without a cursor"),
        }
        Ok(())
    }

    /// Messages newer than the cursor, oldest first.
    pub async fn next_batch(&self) -> Result<Vec<ChatMessage>, RelayError> {
        let chat = &self.chat;
        let room = self.room.as_str();
        let cursor = self.cursor.as_deref();
        let mut batch = self
            .call_with_backoff(|| chat.recent_history(room, cursor))
            .await?;

        // The service echoes the cursor message back as the first item.
        if let Some(cursor) = cursor
            && !batch.is_empty()
        {
            let boundary = batch.remove(0);
            if boundary.id != cursor {
                warn!(
                    "Expected boundary message {} but service returned {} first; dropping it anyway",
                    cursor, boundary.id
                );
            }
        }

        debug!("Poll returned {} new messages", batch.len());
        Ok(batch)
    }

    /// Persists `message_id` as the new resume position.
    pub async fn advance(&mut self, message_id: &str) -> Result<(), RelayError> {
        self.store.set(message_id).await?;
        self.cursor = Some(message_id.to_string());
        Ok(())
    }

    /// Transient failures get the short retry; rate limiting restarts the
    /// same call after the cool-down. Anything else, or running out of
    /// either budget, is returned to the caller.
    async fn call_with_backoff<T, F, Fut>(&self, op: F) -> Result<T, ChatError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ChatError>>,
    {
        let op = &op;
        let transient = self.transient;
        retry(
            self.backoff,
            |e: &RetryError<ChatError>| matches!(e, RetryError::Aborted(inner) if inner.is_rate_limited()),
            move || retry(transient, ChatError::is_transient, op),
        )
        .await
        .map_err(|outer| outer.into_inner().into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat::fake::{FakeChat, msg};
    use std::time::Duration;

    const FAST: RetryConfig = RetryConfig::new(4, Duration::from_millis(1));
    const FAST_BACKOFF: RetryConfig = RetryConfig::new(3, Duration::from_millis(1));

    fn poller(chat: Arc<FakeChat>, store: CursorStore) -> RateLimitedPoller {
        RateLimitedPoller::new(chat, store, "ops").with_retry(FAST, FAST_BACKOFF)
    }

    #[tokio::test]
    async fn bootstrap_seeds_and_persists_latest_message() {
        let chat = Arc::new(FakeChat::with_history(vec![msg("a", "1"), msg("b", "2")]));
        let store = CursorStore::in_memory().unwrap();
        let mut p = poller(chat.clone(), store.clone());
        p.bootstrap().await.unwrap();
        assert_eq!(p.cursor(), Some("b"));
        assert_eq!(store.get().await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn bootstrap_prefers_persisted_cursor() {
        let chat = Arc::new(FakeChat::with_history(vec![msg("z", "newest")]));
        let store = CursorStore::in_memory().unwrap();
        store.set("42").await.unwrap();
        let mut p = poller(chat.clone(), store);
        p.bootstrap().await.unwrap();
        p.next_batch().await.unwrap();
        assert_eq!(p.cursor(), Some("42"));
        assert_eq!(*chat.history_calls.lock().unwrap(), 0);
        assert_eq!(
            chat.not_before_seen.lock().unwrap().clone(),
            vec![Some("42".to_string())]
        );
    }

    #[tokio::test]
    async fn next_batch_strips_boundary_message() {
        let chat = Arc::new(FakeChat::with_history(vec![msg("a", "old")]));
        chat.script(Ok(vec![msg("a", "old"), msg("b", "new"), msg("c", "newer")]));
        let mut p = poller(chat.clone(), CursorStore::in_memory().unwrap());
        p.bootstrap().await.unwrap();
        let ids: Vec<_> = p.next_batch().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn empty_room_keeps_every_message_of_first_poll() {
        let chat = Arc::new(FakeChat::default());
        chat.script(Ok(vec![msg("a", "first"), msg("b", "second")]));
        let mut p = poller(chat.clone(), CursorStore::in_memory().unwrap());
        p.bootstrap().await.unwrap();
        assert_eq!(p.cursor(), None);
        assert_eq!(p.next_batch().await.unwrap().len(), 2);
        assert_eq!(chat.not_before_seen.lock().unwrap().clone(), vec![None]);
    }

    #[tokio::test]
    async fn rate_limit_retries_the_same_batch() {
        let chat = Arc::new(FakeChat::with_history(vec![msg("a", "old")]));
        chat.script(Err(FakeChat::rate_limited()));
        chat.script(Err(FakeChat::rate_limited()));
        chat.script(Ok(vec![msg("a", "old"), msg("b", "new")]));
        let mut p = poller(chat.clone(), CursorStore::in_memory().unwrap());
        p.bootstrap().await.unwrap();
        let batch = p.next_batch().await.unwrap();
        assert_eq!(batch, vec![msg("b", "new")]);
        let seen = chat.not_before_seen.lock().unwrap().clone();
        assert_eq!(seen, vec![Some("a".to_string()); 3]);
    }

    #[tokio::test]
    async fn rate_limit_past_budget_is_fatal() {
        let chat = Arc::new(FakeChat::with_history(vec![msg("a", "old")]));
        for _ in 0..5 {
            chat.script(Err(FakeChat::rate_limited()));
        }
        let mut p = poller(chat.clone(), CursorStore::in_memory().unwrap());
        p.bootstrap().await.unwrap();
        let err = p.next_batch().await.unwrap_err();
        assert!(matches!(err, RelayError::Chat(ChatError::RateLimited { .. })));
        assert_eq!(chat.not_before_seen.lock().unwrap().len(), 3);
        assert_eq!(p.cursor(), Some("a"));
    }

    #[tokio::test]
    async fn transient_errors_use_short_retry() {
        let chat = Arc::new(FakeChat::with_history(vec![msg("a", "old")]));
        chat.script(Err(ChatError::Status {
            status: 502,
            body: "bad gateway".into(),
        }));
        chat.script(Ok(vec![msg("a", "old"), msg("b", "new")]));
        let mut p = poller(chat.clone(), CursorStore::in_memory().unwrap());
        p.bootstrap().await.unwrap();
        assert_eq!(p.next_batch().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let chat = Arc::new(FakeChat::with_history(vec![msg("a", "old")]));
        chat.script(Err(ChatError::Status {
            status: 401,
            body: "unauthorized".into(),
        }));
        let mut p = poller(chat.clone(), CursorStore::in_memory().unwrap());
        p.bootstrap().await.unwrap();
        assert!(p.next_batch().await.is_err());
        assert_eq!(chat.not_before_seen.lock().unwrap().len(), 1);
    }
}
