use super::{ContainerClient, ContainerLifecycle};
use crate::error::RuntimeError;
use crate::types::{Filter, ManagedContainer};
use anyhow::Result;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerConfig, ContainerInspectResponse};
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, info, warn};

pub struct DockerRuntime {
    docker: Docker,
    include_stopped: bool,
    stop_timeout_secs: i64,
}

impl DockerRuntime {
    pub fn new(docker: Docker, include_stopped: bool, stop_timeout_secs: i64) -> Self {
        Self {
            docker,
            include_stopped,
            stop_timeout_secs,
        }
    }

    pub fn connect() -> Result<Docker> {
        // Connect to the local Docker daemon using default settings.
        // This handles unix socket on Linux.
        Docker::connect_with_local_defaults().map_err(Into::into)
    }

    async fn image_id(&self, image: &str) -> Result<String, RuntimeError> {
        let detail = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|e| classify(e, image))?;
        detail
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RuntimeError::Other(format!("image {} has no id", image)))
    }
}

#[async_trait]
impl ContainerClient for DockerRuntime {
    async fn list_containers(&self, filter: &Filter) -> Result<Vec<ManagedContainer>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: self.include_stopped,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(opts)).await?;

        let mut containers = Vec::new();
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            // Containers can disappear between listing and inspection.
            let detail = match self.docker.inspect_container(&id, None).await {
                Ok(detail) => detail,
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => {
                    warn!("Container {} vanished during listing", id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let container = to_managed(detail);
            if filter.matches(&container) {
                containers.push(container);
            }
        }
        debug!("Listed {} matching containers", containers.len());
        Ok(containers)
    }

    async fn has_new_image_locally(
        &self,
        container: &ManagedContainer,
    ) -> Result<(bool, String), RuntimeError> {
        let image_id = self.image_id(container.target_image()).await?;
        let newer = image_id != container.image_id;
        debug!(
            "Local image for {} is {} (running {}), newer: {}",
            container.name, image_id, container.image_id, newer
        );
        Ok((newer, image_id))
    }

    async fn pull_needed(&self, container: &ManagedContainer) -> Result<bool, RuntimeError> {
        let target = container.target_image();
        let remote = self.docker.inspect_registry_image(target, None).await?;
        let Some(remote_digest) = remote.descriptor.digest else {
            // Without a remote digest there is nothing to compare against.
            return Ok(true);
        };

        let local = self
            .docker
            .inspect_image(&container.image_id)
            .await
            .map_err(|e| classify(e, &container.image_id))?;
        let repo_digests = local.repo_digests.unwrap_or_default();
        let needed = !digest_matches(&repo_digests, &remote_digest);
        debug!(
            "Remote digest for {} is {}, pull needed: {}",
            target, remote_digest, needed
        );
        Ok(needed)
    }
}

#[async_trait]
impl ContainerLifecycle for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<String, RuntimeError> {
        info!("Pulling image {}", image);
        let opts = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(opts), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress?;
            if let Some(status) = progress.status {
                debug!("{}: {}", image, status);
            }
        }
        self.image_id(image).await
    }

    async fn recreate_container(
        &self,
        container: &ManagedContainer,
        image: &str,
    ) -> Result<String, RuntimeError> {
        let detail = self.docker.inspect_container(&container.id, None).await?;
        let host_config = detail.host_config;
        let config = detail.config.unwrap_or_default();

        if container.running {
            info!("Stopping container {}", container.name);
            let opts = StopContainerOptions {
                t: self.stop_timeout_secs,
            };
            match self.docker.stop_container(&container.id, Some(opts)).await {
                Ok(()) => {}
                // Already stopped
                Err(DockerError::DockerResponseServerError {
                    status_code: 304, ..
                }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(&container.id, Some(opts)).await?;

        let opts = CreateContainerOptions {
            name: container.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(opts), recreate_config(config, host_config, image))
            .await?;
        info!(
            "Recreated container {} with image {} ({})",
            container.name, image, created.id
        );

        if container.running {
            self.docker
                .start_container(&created.id, None::<StartContainerOptions<String>>)
                .await?;
        }
        Ok(created.id)
    }
}

fn classify(err: DockerError, what: &str) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(what.to_string()),
        other => other.into(),
    }
}

fn to_managed(detail: ContainerInspectResponse) -> ManagedContainer {
    let config = detail.config.unwrap_or_default();
    ManagedContainer {
        id: detail.id.unwrap_or_default(),
        name: detail
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image_name: config.image.unwrap_or_default(),
        image_id: detail.image.unwrap_or_default(),
        hostname: config.hostname.unwrap_or_default(),
        labels: config.labels.unwrap_or_default(),
        running: detail.state.and_then(|s| s.running).unwrap_or(false),
        pending_image: None,
    }
}

fn recreate_config(
    config: ContainerConfig,
    host_config: Option<bollard::models::HostConfig>,
    image: &str,
) -> Config<String> {
    Config {
        image: Some(image.to_string()),
        hostname: config.hostname,
        domainname: config.domainname,
        user: config.user,
        env: config.env,
        cmd: config.cmd,
        entrypoint: config.entrypoint,
        labels: config.labels,
        working_dir: config.working_dir,
        exposed_ports: config.exposed_ports,
        volumes: config.volumes,
        tty: config.tty,
        open_stdin: config.open_stdin,
        stdin_once: config.stdin_once,
        stop_signal: config.stop_signal,
        stop_timeout: config.stop_timeout,
        healthcheck: config.healthcheck,
        host_config,
        ..Default::default()
    }
}

/// True when one of the local `name@digest` entries carries `remote`.
fn digest_matches(repo_digests: &[String], remote: &str) -> bool {
    repo_digests
        .iter()
        .any(|entry| entry.rsplit('@').next() == Some(remote))
}
