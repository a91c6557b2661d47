//! Data structures shared by the trigger endpoint, the validation
//! pipeline and the update executor.
//!
//! Containers are owned values handed out by the runtime client.  A
//! validation pass may assign a replacement image to them; the validated
//! set is then passed on to the update step, so nothing here is shared
//! between concurrent passes.

use std::collections::HashMap;

/// Label marking a container as a managed server instance.
pub const ROLE_LABEL: &str = "io.updraft.role";
/// Value of [`ROLE_LABEL`] for managed servers.
pub const SERVER_ROLE: &str = "server";
/// Label opting a container in (`true`) or out (`false`) of updates.
pub const ENABLE_LABEL: &str = "io.updraft.enable";
/// Label grouping containers into independently updated scopes.
pub const SCOPE_LABEL: &str = "io.updraft.scope";

const DEFAULT_REGISTRY: &str = "docker.io/";
const OFFICIAL_NAMESPACE: &str = "library/";

/// A normalized update request, built once per inbound trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateIntent {
    /// Images named by the caller.  Empty means a general scan.
    pub target_images: Vec<String>,
    pub hostname: Option<String>,
    pub new_image_name: Option<String>,
    pub stop_after_update: bool,
}

impl UpdateIntent {
    /// Explicit targets select the blocking admission policy.
    pub fn has_targets(&self) -> bool {
        !self.target_images.is_empty()
    }

    /// Adds a target image, ignoring blanks and duplicates.
    pub fn add_target(&mut self, image: &str) {
        let image = image.trim();
        if image.is_empty() || self.target_images.iter().any(|i| i == image) {
            return;
        }
        self.target_images.push(image.to_string());
    }
}

/// A container as seen by the update core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    /// Image reference from the container configuration, e.g. `nginx:1.27`.
    pub image_name: String,
    /// Id of the image the container currently runs.
    pub image_id: String,
    pub hostname: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
    /// Replacement image assigned during validation.
    pub pending_image: Option<String>,
}

impl ManagedContainer {
    pub fn is_managed_server(&self) -> bool {
        self.label(ROLE_LABEL) == Some(SERVER_ROLE)
    }

    pub fn set_pending_image(&mut self, image: &str) {
        self.pending_image = Some(image.to_string());
    }

    /// The image the container should run after an update.
    pub fn target_image(&self) -> &str {
        self.pending_image.as_deref().unwrap_or(&self.image_name)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Selects the containers an update pass operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub images: Vec<String>,
    pub hostname: Option<String>,
    pub scope: Option<String>,
    pub label_enable: bool,
}

impl Filter {
    pub fn matches(&self, container: &ManagedContainer) -> bool {
        match container.label(ENABLE_LABEL) {
            Some("false") => return false,
            Some("true") => {}
            _ if self.label_enable => return false,
            _ => {}
        }

        if let Some(scope) = &self.scope {
            if container.label(SCOPE_LABEL) != Some(scope.as_str()) {
                return false;
            }
        }

        if let Some(hostname) = &self.hostname {
            if &container.hostname != hostname {
                return false;
            }
        }

        if self.images.is_empty() {
            return true;
        }
        let repo = image_repository(&container.image_name);
        self.images.iter().any(|i| image_repository(i) == repo)
    }
}

/// Inputs of one validation pass.
#[derive(Debug, Clone, Default)]
pub struct UpdateParams {
    pub filter: Filter,
    pub allowed_image_repos: Vec<String>,
    /// Replacement image, empty when the containers keep their own.
    pub new_image_name: String,
}

/// Outcome of a dispatch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The executor ran and succeeded.
    Completed,
    /// A scan was already running, nothing was done.
    Skipped,
}

/// Strips the tag or digest from an image reference and normalizes the
/// default registry, so `docker.io/library/nginx:1.27` becomes `nginx`.
pub fn image_repository(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    // A colon after the last slash separates the tag; earlier ones belong
    // to a registry port.
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    let image = match image[name_start..].find(':') {
        Some(i) => &image[..name_start + i],
        None => image,
    };
    let image = image.strip_prefix(DEFAULT_REGISTRY).unwrap_or(image);
    image.strip_prefix(OFFICIAL_NAMESPACE).unwrap_or(image)
}
