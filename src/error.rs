//! Error types of the update path.

use thiserror::Error;

/// Failure reported by the container runtime client.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The requested object (usually an image) does not exist locally.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// The admission gate was closed and can no longer hand out permits.
#[derive(Debug, Error)]
#[error("update gate closed")]
pub struct GateClosed;

/// Error returned by an update dispatch.
///
/// Only [`UpdateError::Validation`] carries a message that is safe to show
/// to the caller; everything else is reported as an opaque failure.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    GateClosed(#[from] GateClosed),
}

impl UpdateError {
    pub fn validation(reason: impl Into<String>) -> Self {
        UpdateError::Validation(reason.into())
    }
}

/// A request parameter could not be parsed.
#[derive(Debug, Error)]
#[error("invalid {name} parameter: {value:?}")]
pub struct InvalidParameter {
    pub name: String,
    pub value: String,
}
