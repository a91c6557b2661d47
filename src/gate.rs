//! Single-flight admission gate.
//!
//! The gate holds one token.  Whoever holds the [`GatePermit`] is the only
//! update in flight; dropping the permit returns the token, so it is
//! released on every exit path, including panics and dropped futures.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::GateClosed;

/// Capacity-1 token shared by every dispatch in the process.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    token: Arc<Semaphore>,
}

/// Proof of holding the gate.  The token is returned on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            token: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait until the token is available and take it.
    pub async fn acquire_blocking(&self) -> Result<GatePermit, GateClosed> {
        let permit = Arc::clone(&self.token)
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Take the token if it is available right now.
    pub fn try_acquire(&self) -> Result<Option<GatePermit>, GateClosed> {
        match Arc::clone(&self.token).try_acquire_owned() {
            Ok(permit) => Ok(Some(GatePermit { _permit: permit })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(GateClosed),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.token.available_permits() == 0
    }

    /// Stop handing out permits.  Pending and future acquisitions fail.
    pub fn close(&self) {
        self.token.close();
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}
