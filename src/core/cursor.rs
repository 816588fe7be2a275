use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::platform::{NativePlatform, Platform};

pub const DEFAULT_CURSOR_PATH: &str = "/data/cursor.db";
const LAST_MESSAGE_KEY: &str = "last_message_id";

/// Durable "last processed message id" for one worker. Lives on the worker's
/// own volume so a restarted container resumes where it left off.
#[derive(Clone)]
pub struct CursorStore {
    db: Arc<Mutex<Connection>>,
}

impl CursorStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cursor directory {}", parent.display()))?;
            // Only directories we created ourselves are tightened.
            NativePlatform::restrict_dir_permissions(parent);
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening cursor database {}", path.display()))?;
        let store = Self::with_connection(conn)?;
        NativePlatform::restrict_file_permissions(path);
        Ok(store)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cursor (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn get(&self) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .query_row(
                "SELECT value FROM cursor WHERE key = ?1",
                [LAST_MESSAGE_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub async fn set(&self, message_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO cursor (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=CURRENT_TIMESTAMP",
            (LAST_MESSAGE_KEY, message_id),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_store_has_no_cursor() {
        let store = CursorStore::in_memory().unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let store = CursorStore::in_memory().unwrap();
        store.set("41").await.unwrap();
        store.set("42").await.unwrap();
        assert_eq!(store.get().await.unwrap().as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn cursor_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cursor.db");
        {
            let store = CursorStore::open(&path).unwrap();
            store.set("abc-123").await.unwrap();
        }
        let reopened = CursorStore::open(&path).unwrap();
        assert_eq!(reopened.get().await.unwrap().as_deref(), Some("abc-123"));
    }
}
