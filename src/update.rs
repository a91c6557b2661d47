//! Update execution.
//!
//! [`UpdateExecutor`] is what the coordinator invokes once it holds the
//! gate.  [`RuntimeUpdater`] is the daemon's implementation: it validates
//! the request, then pulls and recreates every selected container.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::watch;

use crate::error::{RuntimeError, UpdateError};
use crate::runtime::{ContainerClient, ContainerLifecycle};
use crate::types::{Filter, ManagedContainer, UpdateParams};
use crate::validation::validate;

#[async_trait]
pub trait UpdateExecutor: Send + Sync {
    async fn perform_update(
        &self,
        images: &[String],
        hostname: &str,
        new_image_name: &str,
        stop_after_update: bool,
    ) -> Result<(), UpdateError>;
}

/// Static selection settings applied to every request.
#[derive(Debug, Clone, Default)]
pub struct UpdatePolicy {
    pub allowed_image_repos: Vec<String>,
    pub scope: Option<String>,
    pub label_enable: bool,
}

impl UpdatePolicy {
    fn params(&self, images: &[String], hostname: &str, new_image_name: &str) -> UpdateParams {
        UpdateParams {
            filter: Filter {
                images: images.to_vec(),
                hostname: (!hostname.is_empty()).then(|| hostname.to_string()),
                scope: self.scope.clone(),
                label_enable: self.label_enable,
            },
            allowed_image_repos: self.allowed_image_repos.clone(),
            new_image_name: new_image_name.to_string(),
        }
    }
}

pub struct RuntimeUpdater<R> {
    runtime: Arc<R>,
    policy: UpdatePolicy,
    shutdown: watch::Sender<bool>,
}

impl<R> RuntimeUpdater<R>
where
    R: ContainerClient + ContainerLifecycle,
{
    pub fn new(runtime: Arc<R>, policy: UpdatePolicy, shutdown: watch::Sender<bool>) -> Self {
        Self {
            runtime,
            policy,
            shutdown,
        }
    }

    /// Returns false when the container already runs the pulled image.
    async fn update_container(&self, container: &ManagedContainer) -> Result<bool, RuntimeError> {
        let image = container.target_image();
        let image_id = self.runtime.pull_image(image).await?;
        if container.pending_image.is_none() && image_id == container.image_id {
            info!("Container {} is up to date", container.name);
            return Ok(false);
        }
        self.runtime.recreate_container(container, image).await?;
        Ok(true)
    }
}

#[async_trait]
impl<R> UpdateExecutor for RuntimeUpdater<R>
where
    R: ContainerClient + ContainerLifecycle + 'static,
{
    async fn perform_update(
        &self,
        images: &[String],
        hostname: &str,
        new_image_name: &str,
        stop_after_update: bool,
    ) -> Result<(), UpdateError> {
        let params = self.policy.params(images, hostname, new_image_name);
        let containers = validate(self.runtime.as_ref(), &params)
            .await
            .into_result()?;

        let mut updated = 0;
        let mut failed = 0;
        for container in &containers {
            match self.update_container(container).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to update container {}: {}", container.name, e);
                    failed += 1;
                }
            }
        }
        info!(
            "Update pass finished: {} scanned, {} updated, {} failed",
            containers.len(),
            updated,
            failed
        );

        if stop_after_update {
            info!("Stop after update requested, shutting down");
            // No receivers left means the daemon is already stopping.
            let _ = self.shutdown.send(true);
        }

        if failed > 0 {
            return Err(RuntimeError::Other(format!(
                "{} of {} containers failed to update",
                failed,
                containers.len()
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{server, worker, MockRuntime};
    use crate::validation::NO_NEW_IMAGE;

    fn updater(runtime: MockRuntime) -> (RuntimeUpdater<MockRuntime>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let updater = RuntimeUpdater::new(Arc::new(runtime), UpdatePolicy::default(), tx);
        (updater, rx)
    }

    #[tokio::test]
    async fn rejection_is_forwarded_without_touching_containers() {
        let (updater, _rx) = updater(MockRuntime::new(vec![worker("web")]));

        let err = updater.perform_update(&[], "", "", false).await.unwrap_err();

        assert!(matches!(err, UpdateError::Validation(ref r) if r == NO_NEW_IMAGE));
        assert_eq!(updater.runtime.calls().pull, 0);
        assert_eq!(updater.runtime.calls().recreate, 0);
    }

    #[tokio::test]
    async fn targets_select_containers_by_image() {
        let runtime = MockRuntime::new(vec![worker("web"), server("pmm")]).remote(Ok(true));
        let (updater, _rx) = updater(runtime);

        updater
            .perform_update(&["nginx".to_string()], "", "", false)
            .await
            .unwrap();

        assert_eq!(
            updater.runtime.recreated(),
            vec![("web".to_string(), "nginx:1.26".to_string())]
        );
    }

    #[tokio::test]
    async fn unchanged_containers_are_not_recreated() {
        let runtime = MockRuntime::new(vec![worker("web"), server("pmm")])
            .remote(Ok(true))
            .pulls("nginx:1.26", "sha256:old");
        let (updater, _rx) = updater(runtime);

        updater.perform_update(&[], "", "", false).await.unwrap();

        assert_eq!(updater.runtime.calls().pull, 2);
        assert_eq!(
            updater.runtime.recreated(),
            vec![("pmm".to_string(), "percona/pmm-server:2".to_string())]
        );
    }

    #[tokio::test]
    async fn new_image_is_applied_to_servers() {
        let runtime = MockRuntime::new(vec![server("pmm")]).local(Ok(true));
        let (updater, _rx) = updater(runtime);

        updater
            .perform_update(&[], "pmm-host", "percona/pmm-server:3", false)
            .await
            .unwrap();

        assert_eq!(
            updater.runtime.recreated(),
            vec![("pmm".to_string(), "percona/pmm-server:3".to_string())]
        );
    }

    #[tokio::test]
    async fn failures_are_counted_after_trying_everything() {
        let runtime = MockRuntime::new(vec![worker("a"), worker("b")])
            .remote(Ok(true))
            .fail_recreate("a");
        let (updater, _rx) = updater(runtime);

        let err = updater.perform_update(&[], "", "", false).await.unwrap_err();

        assert!(matches!(err, UpdateError::Runtime(_)));
        assert_eq!(err.to_string(), "1 of 2 containers failed to update");
        assert_eq!(updater.runtime.calls().recreate, 2);
    }

    #[tokio::test]
    async fn stop_after_update_signals_shutdown() {
        let runtime = MockRuntime::new(vec![worker("web")]).remote(Ok(true));
        let (updater, rx) = updater(runtime);

        updater.perform_update(&[], "", "", true).await.unwrap();

        assert!(*rx.borrow());
    }

    #[test]
    fn policy_builds_params_from_request() {
        let policy = UpdatePolicy {
            allowed_image_repos: vec!["percona/".into()],
            scope: Some("prod".into()),
            label_enable: true,
        };

        let params = policy.params(&["nginx".to_string()], "", "percona/pmm-server:3");

        assert_eq!(params.filter.images, vec!["nginx"]);
        assert_eq!(params.filter.hostname, None);
        assert_eq!(params.filter.scope.as_deref(), Some("prod"));
        assert!(params.filter.label_enable);
        assert_eq!(params.allowed_image_repos, vec!["percona/"]);
        assert_eq!(params.new_image_name, "percona/pmm-server:3");
    }
}
