//! Update coordinator.
//!
//! Requests naming explicit images wait for the running update to finish;
//! general scans are skipped while another update holds the gate.

use std::sync::Arc;

use log::{debug, info};

use crate::error::UpdateError;
use crate::gate::{AdmissionGate, GatePermit};
use crate::types::{DispatchOutcome, UpdateIntent};
use crate::update::UpdateExecutor;

pub struct Coordinator {
    executor: Arc<dyn UpdateExecutor>,
    gate: AdmissionGate,
}

impl Coordinator {
    pub fn new(executor: Arc<dyn UpdateExecutor>, gate: AdmissionGate) -> Self {
        Self { executor, gate }
    }

    pub async fn dispatch(&self, intent: &UpdateIntent) -> Result<DispatchOutcome, UpdateError> {
        let permit = if intent.has_targets() {
            if self.gate.is_busy() {
                debug!("Update in progress, {:?} waits for the gate", intent.target_images);
            }
            self.gate.acquire_blocking().await?
        } else {
            match self.gate.try_acquire()? {
                Some(permit) => permit,
                None => {
                    debug!("Skipped. Another update already running.");
                    return Ok(DispatchOutcome::Skipped);
                }
            }
        };

        self.run(permit, intent).await
    }

    async fn run(&self, permit: GatePermit, intent: &UpdateIntent) -> Result<DispatchOutcome, UpdateError> {
        info!("Running update for {} target image(s)", intent.target_images.len());
        let result = self
            .executor
            .perform_update(
                &intent.target_images,
                intent.hostname.as_deref().unwrap_or_default(),
                intent.new_image_name.as_deref().unwrap_or_default(),
                intent.stop_after_update,
            )
            .await;
        drop(permit);
        result.map(|()| DispatchOutcome::Completed)
    }
}
