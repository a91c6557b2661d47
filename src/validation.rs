//! Pre-update validation.
//!
//! Decides, before anything is pulled or recreated, whether the containers
//! selected by a request may be updated and whether a newer image exists.
//! The local image store is consulted first; the registry is only asked
//! when the local check has no answer.

use log::{debug, trace};

use crate::allowlist::is_image_allowed;
use crate::error::{RuntimeError, UpdateError};
use crate::runtime::ContainerClient;
use crate::types::{ManagedContainer, UpdateParams};

pub const NO_CONTAINERS: &str = "no containers found";
pub const NOT_A_SERVER: &str = "container is not a managed server";
pub const IMAGE_NOT_ALLOWED: &str = "image not allowed";
pub const NO_NEW_IMAGE: &str = "no new image available";

/// Result of one validation pass.
#[derive(Debug)]
pub enum ValidationOutcome {
    /// The update may go ahead on these containers.
    Proceed(Vec<ManagedContainer>),
    /// The request cannot be honored; the reason is safe to show.
    Rejected(String),
    /// The runtime client failed.
    Failed(RuntimeError),
}

impl ValidationOutcome {
    pub fn into_result(self) -> Result<Vec<ManagedContainer>, UpdateError> {
        match self {
            ValidationOutcome::Proceed(containers) => Ok(containers),
            ValidationOutcome::Rejected(reason) => Err(UpdateError::validation(reason)),
            ValidationOutcome::Failed(err) => Err(err.into()),
        }
    }
}

pub async fn validate(client: &dyn ContainerClient, params: &UpdateParams) -> ValidationOutcome {
    let mut containers = match client.list_containers(&params.filter).await {
        Ok(containers) => containers,
        Err(err) => return ValidationOutcome::Failed(err),
    };
    if containers.is_empty() {
        return ValidationOutcome::Rejected(NO_CONTAINERS.into());
    }

    if !params.new_image_name.is_empty() {
        for container in &mut containers {
            if !container.is_managed_server() {
                return ValidationOutcome::Rejected(NOT_A_SERVER.into());
            }
            container.set_pending_image(&params.new_image_name);
            trace!(
                "Server container {} new image name is {}",
                container.name,
                params.new_image_name
            );
        }
    }

    if !is_image_allowed(&params.allowed_image_repos, &params.new_image_name) {
        return ValidationOutcome::Rejected(IMAGE_NOT_ALLOWED.into());
    }

    let first = &containers[0];
    let has_new = match client.has_new_image_locally(first).await {
        Ok((has_new, _)) => has_new,
        Err(err) if err.is_not_found() => {
            debug!("Image not found locally, checking remotely: {}", err);
            false
        }
        Err(err) => return ValidationOutcome::Failed(err),
    };
    if has_new {
        return ValidationOutcome::Proceed(containers);
    }

    let pull_needed = client.pull_needed(first).await;
    match pull_needed {
        Ok(true) => ValidationOutcome::Proceed(containers),
        Ok(false) => ValidationOutcome::Rejected(NO_NEW_IMAGE.into()),
        Err(err) => ValidationOutcome::Failed(err),
    }
}
