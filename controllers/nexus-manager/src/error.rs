//! Controller-specific error types.
//!
//! Every failure of a reconciliation pass ends up in one of the
//! [`ErrorKind`] classes, which decide the requeue policy and the status
//! condition reported on the Host.

use cluster_client::ClusterError;
use thiserror::Error;

/// Errors that can occur in the nexus-manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The Host cannot be rendered until its spec is edited
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Another writer raced ahead of this pass
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The object store could not be reached
    #[error("Object store unavailable: {0}")]
    Unavailable(String),

    /// A generated name is held by an object the Host does not own
    #[error("Name conflict: {0}")]
    NameConflict(String),

    /// The pass observed the shutdown signal
    #[error("Reconciliation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// An HTTP listener failed
    #[error("Server error: {0}")]
    Server(String),
}

/// Failure class of a [`ControllerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Permanent until the user edits the spec; no timer requeue
    InvalidSpec,
    /// Expected under concurrency; immediate requeue without backoff growth
    Conflict,
    /// Transient infrastructure failure; exponential backoff
    Unavailable,
    /// Generated name squatted by a foreign object; exponential backoff
    NameConflict,
    /// Shutdown in progress
    Cancelled,
    /// Startup or watch failure outside a pass
    Fatal,
}

impl ErrorKind {
    /// Metric label for the outcome of a failed pass.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidSpec => "invalid_spec",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NameConflict => "name_conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            ControllerError::Conflict(_) => ErrorKind::Conflict,
            ControllerError::Unavailable(_) => ErrorKind::Unavailable,
            ControllerError::NameConflict(_) => ErrorKind::NameConflict,
            ControllerError::Cancelled => ErrorKind::Cancelled,
            ControllerError::InvalidConfig(_) | ControllerError::Watch(_) | ControllerError::Server(_) => {
                ErrorKind::Fatal
            }
        }
    }
}

impl From<ClusterError> for ControllerError {
    fn from(err: ClusterError) -> Self {
        match err {
            // The object moved under us; a fresh pass sees the new state
            ClusterError::NotFound(msg) | ClusterError::Conflict(msg) | ClusterError::AlreadyExists(msg) => {
                ControllerError::Conflict(msg)
            }
            // The API server refused a rendered object: only a spec edit can fix it
            ClusterError::Rejected(msg) => ControllerError::InvalidSpec(msg),
            ClusterError::Unavailable(msg) => ControllerError::Unavailable(msg),
            ClusterError::Serialization(e) => ControllerError::Unavailable(e.to_string()),
        }
    }
}
