use crate::error::RuntimeError;
use crate::types::{Filter, ManagedContainer};
use async_trait::async_trait;

pub mod docker;
pub use docker::DockerRuntime;

/// Read-side view of the container runtime used by validation.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// List the containers selected by `filter`.
    async fn list_containers(&self, filter: &Filter) -> Result<Vec<ManagedContainer>, RuntimeError>;

    /// Check whether the container's target image is present locally and
    /// differs from the image it runs.  Returns the local image id.
    ///
    /// A missing image yields [`RuntimeError::NotFound`].
    async fn has_new_image_locally(
        &self,
        container: &ManagedContainer,
    ) -> Result<(bool, String), RuntimeError>;

    /// Ask the registry whether the target image has a digest the local
    /// copy lacks.
    async fn pull_needed(&self, container: &ManagedContainer) -> Result<bool, RuntimeError>;
}

/// Mutating operations the update executor needs on top of [`ContainerClient`].
#[async_trait]
pub trait ContainerLifecycle: Send + Sync {
    /// Pull `image` and return the resulting local image id.
    async fn pull_image(&self, image: &str) -> Result<String, RuntimeError>;

    /// Replace `container` with a new one running `image`, keeping its
    /// configuration.  Returns the new container id.
    async fn recreate_container(
        &self,
        container: &ManagedContainer,
        image: &str,
    ) -> Result<String, RuntimeError>;
}
