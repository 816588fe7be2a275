use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, error, info};

use crate::core::chat::{DEFAULT_CHAT_BASE_URL, HipChatClient};
use crate::core::cursor::{CursorStore, DEFAULT_CURSOR_PATH};
use crate::core::relay::RelayWorker;
use crate::core::subscription::{ENV_CHAT_BASE_URL, ENV_CURSOR_PATH, Subscription};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Runs one relay loop configured entirely from the environment.
pub async fn run_worker() -> Result<()> {
    crate::logging::init(Level::INFO, None);

    let subscription = Subscription::from_env(|key| std::env::var(key).ok())
        .context("invalid worker environment")?;
    let chat_base_url = env_or(ENV_CHAT_BASE_URL, DEFAULT_CHAT_BASE_URL);
    let cursor_path = PathBuf::from(env_or(ENV_CURSOR_PATH, DEFAULT_CURSOR_PATH));

    info!(
        "Worker for {} (chat={}, cursor={})",
        subscription,
        chat_base_url,
        cursor_path.display()
    );

    let chat = HipChatClient::new(&chat_base_url, subscription.api_key())?;
    let store = CursorStore::open(&cursor_path)?;
    let worker = RelayWorker::new(&subscription, Arc::new(chat), store)?;

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                error!("Relay worker stopped: {:#}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Relay worker interrupted, shutting down.");
        }
    }
    Ok(())
}

/// SIGINT, or SIGTERM from `docker stop`.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
