//! In-memory runtime and executor doubles for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RuntimeError, UpdateError};
use crate::runtime::{ContainerClient, ContainerLifecycle};
use crate::types::{Filter, ManagedContainer, ROLE_LABEL, SERVER_ROLE};
use crate::update::UpdateExecutor;

pub fn server(name: &str) -> ManagedContainer {
    ManagedContainer {
        id: format!("{}-id", name),
        name: name.into(),
        image_name: "percona/pmm-server:2".into(),
        image_id: "sha256:old".into(),
        hostname: format!("{}-host", name),
        labels: HashMap::from([(ROLE_LABEL.to_string(), SERVER_ROLE.to_string())]),
        running: true,
        pending_image: None,
    }
}

pub fn worker(name: &str) -> ManagedContainer {
    ManagedContainer {
        id: format!("{}-id", name),
        name: name.into(),
        image_name: "nginx:1.26".into(),
        image_id: "sha256:old".into(),
        hostname: format!("{}-host", name),
        running: true,
        ..Default::default()
    }
}

fn runtime_error(kind: &str) -> RuntimeError {
    match kind {
        "not_found" => RuntimeError::NotFound("image".into()),
        other => RuntimeError::Other(other.into()),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub list: usize,
    pub local: usize,
    pub remote: usize,
    pub pull: usize,
    pub recreate: usize,
}

/// Runtime double.  Listing applies the real [`Filter`].
pub struct MockRuntime {
    containers: Vec<ManagedContainer>,
    list_fails: bool,
    local: Result<bool, &'static str>,
    remote: Result<bool, &'static str>,
    pulled: HashMap<String, String>,
    failing_recreate: Vec<String>,
    calls: Mutex<Calls>,
    recreated: Mutex<Vec<(String, String)>>,
}

impl MockRuntime {
    pub fn new(containers: Vec<ManagedContainer>) -> Self {
        Self {
            containers,
            list_fails: false,
            local: Ok(false),
            remote: Ok(false),
            pulled: HashMap::new(),
            failing_recreate: Vec::new(),
            calls: Mutex::new(Calls::default()),
            recreated: Mutex::new(Vec::new()),
        }
    }

    pub fn list_error(mut self) -> Self {
        self.list_fails = true;
        self
    }

    /// `Err("not_found")` produces [`RuntimeError::NotFound`].
    pub fn local(mut self, result: Result<bool, &'static str>) -> Self {
        self.local = result;
        self
    }

    pub fn remote(mut self, result: Result<bool, &'static str>) -> Self {
        self.remote = result;
        self
    }

    /// Image id returned when `image` is pulled.  Unknown images pull as
    /// `sha256:new`.
    pub fn pulls(mut self, image: &str, id: &str) -> Self {
        self.pulled.insert(image.into(), id.into());
        self
    }

    pub fn fail_recreate(mut self, name: &str) -> Self {
        self.failing_recreate.push(name.into());
        self
    }

    pub fn calls(&self) -> Calls {
        *self.calls.lock().unwrap()
    }

    /// `(container name, image)` pairs in recreate order.
    pub fn recreated(&self) -> Vec<(String, String)> {
        self.recreated.lock().unwrap().clone()
    }

    fn count(&self, bump: impl FnOnce(&mut Calls)) {
        bump(&mut self.calls.lock().unwrap());
    }
}

#[async_trait]
impl ContainerClient for MockRuntime {
    async fn list_containers(&self, filter: &Filter) -> Result<Vec<ManagedContainer>, RuntimeError> {
        self.count(|c| c.list += 1);
        if self.list_fails {
            return Err(runtime_error("daemon unreachable"));
        }
        Ok(self
            .containers
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn has_new_image_locally(
        &self,
        _container: &ManagedContainer,
    ) -> Result<(bool, String), RuntimeError> {
        self.count(|c| c.local += 1);
        self.local
            .map(|newer| (newer, "sha256:local".to_string()))
            .map_err(runtime_error)
    }

    async fn pull_needed(&self, _container: &ManagedContainer) -> Result<bool, RuntimeError> {
        self.count(|c| c.remote += 1);
        self.remote.map_err(runtime_error)
    }
}

#[async_trait]
impl ContainerLifecycle for MockRuntime {
    async fn pull_image(&self, image: &str) -> Result<String, RuntimeError> {
        self.count(|c| c.pull += 1);
        Ok(self
            .pulled
            .get(image)
            .cloned()
            .unwrap_or_else(|| "sha256:new".into()))
    }

    async fn recreate_container(
        &self,
        container: &ManagedContainer,
        image: &str,
    ) -> Result<String, RuntimeError> {
        self.count(|c| c.recreate += 1);
        if self.failing_recreate.contains(&container.name) {
            return Err(runtime_error("create failed"));
        }
        self.recreated
            .lock()
            .unwrap()
            .push((container.name.clone(), image.to_string()));
        Ok(format!("{}-new", container.id))
    }
}

/// What a [`MockExecutor`] returns from every call.
#[derive(Debug, Clone)]
pub enum Mode {
    Succeed,
    Reject(&'static str),
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub images: Vec<String>,
    pub hostname: String,
    pub new_image_name: String,
    pub stop_after_update: bool,
}

/// Executor double that records invocations and peak concurrency.
pub struct MockExecutor {
    mode: Mode,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    invocations: Mutex<Vec<Invocation>>,
}

impl MockExecutor {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateExecutor for MockExecutor {
    async fn perform_update(
        &self,
        images: &[String],
        hostname: &str,
        new_image_name: &str,
        stop_after_update: bool,
    ) -> Result<(), UpdateError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(Invocation {
            images: images.to_vec(),
            hostname: hostname.into(),
            new_image_name: new_image_name.into(),
            stop_after_update,
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.mode {
            Mode::Succeed => Ok(()),
            Mode::Reject(reason) => Err(UpdateError::validation(*reason)),
            Mode::Fail => Err(RuntimeError::Other("docker socket: permission denied".into()).into()),
        }
    }
}
