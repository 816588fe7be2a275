use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::core::config::{CONFIG_FILE_NAME, ManagerConfig};
use crate::core::lifecycle::{LifecycleManager, WorkerTemplate};
use crate::core::runtime::DockerRuntime;
use crate::interfaces::web::ApiServer;
use crate::platform::{NativePlatform, Platform};

use super::ManagerFlags;

pub fn default_config_path() -> PathBuf {
    NativePlatform::data_dir().join(CONFIG_FILE_NAME)
}

/// Loads the config, connects to Docker and serves the API until ctrl-c.
pub async fn run_manager(flags: ManagerFlags) -> Result<()> {
    let config_path = flags.config.unwrap_or_else(default_config_path);
    let mut config = ManagerConfig::load(&config_path).await?;
    if let Some(host) = flags.api_host {
        config.api.host = host;
    }
    if let Some(port) = flags.api_port {
        config.api.port = port;
    }

    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    crate::logging::init(config.log_level(), Some(log_tx.clone()));
    info!("Starting roombridge manager (config: {})", config_path.display());

    let runtime = DockerRuntime::connect(config.docker.socket.as_deref())
        .await
        .context("connecting to the Docker daemon")?;
    let manager = LifecycleManager::new(
        Arc::new(runtime),
        WorkerTemplate::from(&config.worker),
    );
    info!(
        "Workers use image {} (restart on failure up to {} times)",
        config.worker.image, config.worker.restart_max_retries
    );

    ApiServer::new(Arc::new(manager), log_tx, config.api.host, config.api.port)
        .serve()
        .await
}
