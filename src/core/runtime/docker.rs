use async_trait::async_trait;
use bollard::{
    Docker,
    container::LogOutput,
    errors::Error as DockerError,
    models::{ContainerCreateBody, HostConfig, RestartPolicyNameEnum},
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
        ListContainersOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
        RemoveVolumeOptions, StartContainerOptions,
    },
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::{RestartPolicy, RuntimeError, WorkerInstance, WorkerRuntime, WorkerSpec, WorkerState};
use crate::platform::{NativePlatform, Platform};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Workers as Docker containers, reached over the Engine API.
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Tries the configured socket, then `DOCKER_HOST`, then the platform
    /// default, and keeps the first one that answers a ping.
    pub async fn connect(socket: Option<&str>) -> Result<Self, RuntimeError> {
        for candidate in socket_candidates(socket, std::env::var("DOCKER_HOST").ok()) {
            debug!("Trying Docker socket: {}", candidate);
            match Docker::connect_with_socket(
                &candidate,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ) {
                Ok(client) => {
                    if client.ping().await.is_ok() {
                        info!("Connected to Docker via {}", candidate);
                        return Ok(Self { client });
                    }
                    debug!("Docker at {} did not answer ping", candidate);
                }
                Err(e) => debug!("Failed to connect to {}: {}", candidate, e),
            }
        }
        Err(RuntimeError::Backend(
            "no reachable Docker daemon (set [docker].socket or DOCKER_HOST)".to_string(),
        ))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.client.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!("Pulling image {}", image);
        let options = CreateImageOptionsBuilder::default().from_image(image).build();
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::Backend(format!(
                        "failed to pull image {}: {}",
                        image, e
                    )));
                }
            }
        }
        Ok(())
    }
}

fn socket_candidates(configured: Option<&str>, docker_host: Option<String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut push = |s: &str| {
        let s = s.trim();
        let s = s.strip_prefix("unix://").unwrap_or(s);
        let s = s.strip_prefix("npipe://").unwrap_or(s);
        if !s.is_empty() && !out.iter().any(|existing: &String| existing == s) {
            out.push(s.to_string());
        }
    };
    if let Some(s) = configured {
        push(s);
    }
    if let Some(s) = docker_host.as_deref() {
        push(s);
    }
    push(NativePlatform::default_docker_socket());
    out
}

fn container_config(spec: &WorkerSpec) -> ContainerCreateBody {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let restart_policy = match spec.restart {
        RestartPolicy::OnFailure { max_retries } => bollard::models::RestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(i64::from(max_retries)),
        },
    };

    let host_config = HostConfig {
        restart_policy: Some(restart_policy),
        binds: spec
            .volume
            .as_ref()
            .map(|v| vec![format!("{}:{}", v.name, v.target)]),
        auto_remove: Some(false),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        env: Some(env),
        labels: Some(spec.labels.clone()),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn map_err(id: &str, err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(id.to_string()),
        DockerError::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeError::Conflict(id.to_string()),
        other => RuntimeError::Backend(other.to_string()),
    }
}

#[async_trait]
impl WorkerRuntime for DockerRuntime {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: &WorkerSpec) -> Result<String, RuntimeError> {
        self.ensure_image(&spec.image).await?;
        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.name)
            .build();
        let created = self
            .client
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| map_err(&spec.name, e))?;
        debug!("Container {} created as {}", spec.name, created.id);
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.client
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn list(&self) -> Result<Vec<WorkerInstance>, RuntimeError> {
        let options = ListContainersOptionsBuilder::default().all(true).build();
        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Backend(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                Some(WorkerInstance {
                    id,
                    name,
                    labels: c.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn state(&self, id: &str) -> Result<WorkerState, RuntimeError> {
        let inspect = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_err(id, e))?;
        let running = inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false);
        Ok(if running {
            WorkerState::Running
        } else {
            WorkerState::Stopped
        })
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.client
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn logs(&self, id: &str, tail: u32) -> Result<String, RuntimeError> {
        let tail = tail.to_string();
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .tail(&tail)
            .build();

        let mut out = String::new();
        let mut stream = self.client.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => {
                    out.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) if out.is_empty() => return Err(map_err(id, e)),
                Err(e) => {
                    warn!("Log stream for {} ended early: {}", id, e);
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.client
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
            .map_err(|e| map_err(name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime::VolumeMount;
    use std::collections::HashMap;

    #[test]
    fn socket_candidates_strip_schemes_and_dedupe() {
        let out = socket_candidates(
            Some("/run/user/1000/docker.sock"),
            Some("unix:///run/user/1000/docker.sock".to_string()),
        );
        assert_eq!(out[0], "/run/user/1000/docker.sock");
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], NativePlatform::default_docker_socket());
    }

    #[test]
    fn container_config_carries_labels_env_restart_and_volume() {
        let spec = WorkerSpec {
            name: "roombridge-abc".into(),
            image: "roombridge:latest".into(),
            env: vec![("BRIDGE_ROOM_ID".into(), "ops".into())],
            labels: HashMap::from([("roombridge.managed".to_string(), "true".to_string())]),
            restart: RestartPolicy::OnFailure { max_retries: 5 },
            volume: Some(VolumeMount {
                name: "roombridge-cursor-abc".into(),
                target: "/data".into(),
            }),
        };
        let body = container_config(&spec);
        assert_eq!(body.image.as_deref(), Some("roombridge:latest"));
        assert_eq!(body.env, Some(vec!["BRIDGE_ROOM_ID=ops".to_string()]));
        assert_eq!(
            body.labels.unwrap().get("roombridge.managed").map(String::as_str),
            Some("true")
        );
        let host = body.host_config.unwrap();
        let policy = host.restart_policy.unwrap();
        assert_eq!(policy.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(policy.maximum_retry_count, Some(5));
        assert_eq!(host.binds, Some(vec!["roombridge-cursor-abc:/data".to_string()]));
    }
}
