use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::chat::DEFAULT_CHAT_BASE_URL;
use crate::core::registry::SubscriptionRegistry;
use crate::core::runtime::{
    RestartPolicy, RuntimeError, VolumeMount, WorkerInstance, WorkerRuntime, WorkerSpec,
    WorkerState,
};
use crate::core::subscription::{ENV_CHAT_BASE_URL, ENV_CURSOR_PATH, Subscription};

/// How new workers are materialized. Shared by every subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTemplate {
    pub image: String,
    pub chat_base_url: String,
    pub restart_max_retries: u32,
    pub log_tail_lines: u32,
    pub cursor_dir: String,
}

impl Default for WorkerTemplate {
    fn default() -> Self {
        Self {
            image: "roombridge:latest".to_string(),
            chat_base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            restart_max_retries: 5,
            log_tail_lines: 100,
            cursor_dir: "/data".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("worker {name} was created but failed to start: {source}")]
    StartFailed {
        name: String,
        #[source]
        source: RuntimeError,
    },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Keeps exactly one running worker per subscription.
///
/// `start` and `stop` for the same subscription are serialized inside this
/// process. Across processes the deterministic worker name makes `create`
/// the compare-and-swap: the loser sees a name conflict and reports
/// `started: false`.
pub struct LifecycleManager {
    runtime: Arc<dyn WorkerRuntime>,
    registry: SubscriptionRegistry,
    template: WorkerTemplate,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn WorkerRuntime>, template: WorkerTemplate) -> Self {
        Self {
            registry: SubscriptionRegistry::new(runtime.clone()),
            runtime,
            template,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime_kind(&self) -> &'static str {
        self.runtime.kind()
    }

    /// `true` only when this call took the subscription from absent to running.
    pub async fn start(&self, subscription: &Subscription) -> Result<bool, LifecycleError> {
        let lock = self.lock_for(subscription);
        let started = {
            let _guard = lock.lock().await;
            self.start_locked(subscription).await
        };
        self.release_lock(subscription, lock);
        started
    }

    async fn start_locked(&self, subscription: &Subscription) -> Result<bool, LifecycleError> {
        if let Some(existing) = self.registry.find(subscription).await? {
            match self.state_of(&existing).await? {
                Some(WorkerState::Running) => {
                    info!("Worker {} already running for {}", existing.name, subscription);
                    return Ok(false);
                }
                Some(WorkerState::Stopped) => {
                    info!("Replacing stopped worker {} for {}", existing.name, subscription);
                    match self.runtime.remove(&existing.id).await {
                        Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                None => {}
            }
        }

        let spec = self.worker_spec(subscription);
        let id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(RuntimeError::Conflict(_)) => {
                info!("Worker {} was created concurrently elsewhere", spec.name);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(source) = self.runtime.start(&id).await {
            warn!("Removing worker {} after failed start: {}", spec.name, source);
            if let Err(e) = self.runtime.remove(&id).await {
                warn!("Could not remove worker {} after failed start: {}", spec.name, e);
            }
            return Err(LifecycleError::StartFailed {
                name: spec.name,
                source,
            });
        }

        info!("Started worker {} for {}", spec.name, subscription);
        Ok(true)
    }

    /// Removes the subscription's worker, in whatever state, and its cursor.
    pub async fn stop(&self, subscription: &Subscription) -> Result<bool, LifecycleError> {
        let lock = self.lock_for(subscription);
        let stopped = {
            let _guard = lock.lock().await;
            self.stop_locked(subscription).await
        };
        self.release_lock(subscription, lock);
        stopped
    }

    async fn stop_locked(&self, subscription: &Subscription) -> Result<bool, LifecycleError> {
        let Some(instance) = self.registry.find(subscription).await? else {
            return Ok(false);
        };

        match self.runtime.remove(&instance.id).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let volume = subscription.cursor_volume_name();
        if let Err(e) = self.runtime.remove_volume(&volume).await {
            warn!("Could not remove cursor volume {}: {}", volume, e);
        }

        info!("Stopped worker {} for {}", instance.name, subscription);
        Ok(true)
    }

    pub async fn is_running(&self, subscription: &Subscription) -> Result<bool, LifecycleError> {
        Ok(self.registry.find_running(subscription).await?.is_some())
    }

    /// Tail of the worker's own output, or `None` when there is no worker.
    pub async fn recent_logs(
        &self,
        subscription: &Subscription,
    ) -> Result<Option<String>, LifecycleError> {
        let Some(instance) = self.registry.find(subscription).await? else {
            return Ok(None);
        };
        match self
            .runtime
            .logs(&instance.id, self.template.log_tail_lines)
            .await
        {
            Ok(text) => Ok(Some(text)),
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<Subscription>, LifecycleError> {
        Ok(self.registry.all_active().await?)
    }

    pub fn worker_spec(&self, subscription: &Subscription) -> WorkerSpec {
        let cursor_dir = self.template.cursor_dir.trim_end_matches('/');
        let mut env = subscription.to_env();
        env.push((
            ENV_CHAT_BASE_URL.to_string(),
            self.template.chat_base_url.clone(),
        ));
        env.push((
            ENV_CURSOR_PATH.to_string(),
            format!("{}/cursor.db", cursor_dir),
        ));

        WorkerSpec {
            name: subscription.worker_name(),
            image: self.template.image.clone(),
            env,
            labels: subscription.to_tags(),
            restart: RestartPolicy::OnFailure {
                max_retries: self.template.restart_max_retries,
            },
            volume: Some(VolumeMount {
                name: subscription.cursor_volume_name(),
                target: cursor_dir.to_string(),
            }),
        }
    }

    async fn state_of(
        &self,
        instance: &WorkerInstance,
    ) -> Result<Option<WorkerState>, RuntimeError> {
        match self.runtime.state(&instance.id).await {
            Ok(state) => Ok(Some(state)),
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn lock_for(&self, subscription: &Subscription) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(subscription.fingerprint())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Drops the map entry when nobody else is waiting on it.
    fn release_lock(&self, subscription: &Subscription, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&subscription.fingerprint());
        }
    }
}
