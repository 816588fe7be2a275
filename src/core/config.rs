use anyhow::{Result, bail};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::core::chat::DEFAULT_CHAT_BASE_URL;
use crate::core::lifecycle::WorkerTemplate;

pub const CONFIG_FILE_NAME: &str = "manager.toml";
pub const DEFAULT_API_PORT: u16 = 17990;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ManagerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub docker: DockerConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WorkerConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_chat_base_url")]
    pub chat_base_url: String,
    #[serde(default = "default_restart_max_retries")]
    pub restart_max_retries: u32,
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,
    /// Mount point of the per-subscription cursor volume inside the worker.
    #[serde(default = "default_cursor_dir")]
    pub cursor_dir: String,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct DockerConfig {
    #[serde(default)]
    pub socket: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}
fn default_image() -> String {
    "roombridge:latest".to_string()
}
fn default_chat_base_url() -> String {
    DEFAULT_CHAT_BASE_URL.to_string()
}
fn default_restart_max_retries() -> u32 {
    5
}
fn default_log_tail_lines() -> u32 {
    100
}
fn default_cursor_dir() -> String {
    "/data".to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api: ApiConfig::default(),
            worker: WorkerConfig::default(),
            docker: DockerConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            chat_base_url: default_chat_base_url(),
            restart_max_retries: default_restart_max_retries(),
            log_tail_lines: default_log_tail_lines(),
            cursor_dir: default_cursor_dir(),
        }
    }
}

impl From<&WorkerConfig> for WorkerTemplate {
    fn from(cfg: &WorkerConfig) -> Self {
        WorkerTemplate {
            image: cfg.image.clone(),
            chat_base_url: cfg.chat_base_url.clone(),
            restart_max_retries: cfg.restart_max_retries,
            log_tail_lines: cfg.log_tail_lines,
            cursor_dir: cfg.cursor_dir.clone(),
        }
    }
}

impl ManagerConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No {} found, using defaults.", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        info!(
            "Loaded manager config: api={}:{}, image={}, restart_max_retries={}",
            config.api.host, config.api.port, config.worker.image, config.worker.restart_max_retries
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ManagerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.worker.image.trim().is_empty() {
            bail!("[worker].image must not be empty");
        }
        if self.api.port == 0 {
            bail!("[api].port must be non-zero");
        }
        if self.worker.log_tail_lines == 0 {
            bail!("[worker].log_tail_lines must be at least 1");
        }
        if !self.worker.cursor_dir.starts_with('/') {
            bail!("[worker].cursor_dir must be an absolute path inside the worker");
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}
