//! Where worker processes live. The manager only talks to [`WorkerRuntime`];
//! Docker is the production backend.

mod docker;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use std::collections::HashMap;

pub use docker::DockerRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    OnFailure { max_retries: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub target: String,
}

/// Everything needed to materialize one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    pub restart: RestartPolicy,
    pub volume: Option<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInstance {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("a worker named {0} already exists")]
    Conflict(String),
    #[error("worker {0} not found")]
    NotFound(String),
    #[error("runtime backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Short backend name reported by the health endpoint.
    fn kind(&self) -> &'static str;

    /// Creates a stopped worker and returns its id. Names are unique:
    /// creating a second worker with a taken name is a [`RuntimeError::Conflict`].
    async fn create(&self, spec: &WorkerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Every worker the backend knows about, in any state, with its labels.
    async fn list(&self) -> Result<Vec<WorkerInstance>, RuntimeError>;

    async fn state(&self, id: &str) -> Result<WorkerState, RuntimeError>;

    /// Kills and deletes the worker without waiting for in-flight work.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    /// Last `tail` lines of the worker's combined stdout and stderr.
    async fn logs(&self, id: &str, tail: u32) -> Result<String, RuntimeError>;

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError>;
}
