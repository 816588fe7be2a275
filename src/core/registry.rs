use std::sync::Arc;

use tracing::debug;

use crate::core::runtime::{RuntimeError, WorkerInstance, WorkerRuntime, WorkerState};
use crate::core::subscription::Subscription;

/// The set of subscriptions, reconstructed on every call from the labels of
/// the runtime's workers. Nothing is cached and nothing else is persisted.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    runtime: Arc<dyn WorkerRuntime>,
}

impl SubscriptionRegistry {
    pub fn new(runtime: Arc<dyn WorkerRuntime>) -> Self {
        Self { runtime }
    }

    /// First worker, in any state, whose labels decode to exactly `subscription`.
    pub async fn find(
        &self,
        subscription: &Subscription,
    ) -> Result<Option<WorkerInstance>, RuntimeError> {
        Ok(self
            .decoded()
            .await?
            .into_iter()
            .find(|(_, candidate)| candidate == subscription)
            .map(|(instance, _)| instance))
    }

    /// `find`, narrowed to a worker that is currently running.
    pub async fn find_running(
        &self,
        subscription: &Subscription,
    ) -> Result<Option<WorkerInstance>, RuntimeError> {
        match self.find(subscription).await? {
            Some(instance) if self.is_running(&instance).await? => Ok(Some(instance)),
            _ => Ok(None),
        }
    }

    /// Subscriptions whose worker is running. Unlabelled, foreign or
    /// malformed workers are skipped.
    pub async fn all_active(&self) -> Result<Vec<Subscription>, RuntimeError> {
        let mut active = Vec::new();
        for (instance, subscription) in self.decoded().await? {
            if self.is_running(&instance).await? {
                active.push(subscription);
            }
        }
        Ok(active)
    }

    async fn is_running(&self, instance: &WorkerInstance) -> Result<bool, RuntimeError> {
        match self.runtime.state(&instance.id).await {
            Ok(state) => Ok(state == WorkerState::Running),
            // Removed between list and inspect.
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn decoded(&self) -> Result<Vec<(WorkerInstance, Subscription)>, RuntimeError> {
        let instances = self.runtime.list().await?;
        let total = instances.len();
        let decoded: Vec<_> = instances
            .into_iter()
            .filter_map(|instance| {
                let sub = Subscription::decode_tags(&instance.labels)?;
                Some((instance, sub))
            })
            .collect();
        debug!("Registry scan: {} of {} workers are bridges", decoded.len(), total);
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime::memory::MemoryRuntime;
    use crate::core::runtime::{RestartPolicy, WorkerSpec};
    use crate::core::subscription::{MARKER_LABEL, sample};
    use std::collections::HashMap;

    fn spec_for(sub: &Subscription) -> WorkerSpec {
        WorkerSpec {
            name: sub.worker_name(),
            image: "roombridge:latest".into(),
            env: sub.to_env(),
            labels: sub.to_tags(),
            restart: RestartPolicy::OnFailure { max_retries: 0 },
            volume: None,
        }
    }

    #[tokio::test]
    async fn find_matches_exact_tuple_only() {
        let runtime = Arc::new(MemoryRuntime::default());
        let sub = sample();
        let id = runtime.create(&spec_for(&sub)).await.unwrap();
        let registry = SubscriptionRegistry::new(runtime.clone());

        assert_eq!(registry.find(&sub).await.unwrap().map(|w| w.id), Some(id));

        let other_room =
            Subscription::new("secret-token-12345", "dev", "Bridge Bot", "http://127.0.0.1:9999/hook", Some(5))
                .unwrap();
        assert!(registry.find(&other_room).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn all_active_skips_foreign_partial_and_stopped_workers() {
        let runtime = Arc::new(MemoryRuntime::default());
        let running = sample();
        let stopped =
            Subscription::new("another-key-99999", "dev", "Bot", "https://hooks.example.com/x", None).unwrap();

        let id = runtime.create(&spec_for(&running)).await.unwrap();
        runtime.start(&id).await.unwrap();
        runtime.create(&spec_for(&stopped)).await.unwrap();

        runtime.add_foreign("postgres", HashMap::new());
        let mut partial = running.to_tags();
        partial.remove("roombridge.sender");
        runtime.add_foreign("half-written", partial);
        runtime.add_foreign(
            "garbage",
            HashMap::from([
                (MARKER_LABEL.to_string(), "true".to_string()),
                ("roombridge.poll_interval_secs".to_string(), "soon".to_string()),
            ]),
        );

        let registry = SubscriptionRegistry::new(runtime);
        assert_eq!(registry.all_active().await.unwrap(), vec![running]);
    }

    #[tokio::test]
    async fn find_running_ignores_stopped_match() {
        let runtime = Arc::new(MemoryRuntime::default());
        let sub = sample();
        runtime.create(&spec_for(&sub)).await.unwrap();
        let registry = SubscriptionRegistry::new(runtime);
        assert!(registry.find(&sub).await.unwrap().is_some());
        assert!(registry.find_running(&sub).await.unwrap().is_none());
    }
}
