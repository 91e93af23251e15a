//! Object store errors
//!
//! Every failure of a cluster call is classified into one of these kinds at
//! the point of the call, so callers never inspect raw transport errors.

use thiserror::Error;

/// Errors that can occur when reading or writing cluster objects
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// An optimistic-concurrency precondition failed (409 on update/delete)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create hit an existing object of the same name (409 on create)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The API server refused the object (400/422)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Transport failure, timeout, throttling or server error
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// Classifies a kube client error raised while performing `context`.
    pub fn from_kube(err: kube::Error, context: &str) -> Self {
        match err {
            kube::Error::Api(resp) => {
                let detail = format!("{context}: {}", resp.message);
                match resp.code {
                    404 => ClusterError::NotFound(detail),
                    409 if resp.reason == "AlreadyExists" => ClusterError::AlreadyExists(detail),
                    409 => ClusterError::Conflict(detail),
                    400 | 422 => ClusterError::Rejected(detail),
                    _ => ClusterError::Unavailable(format!("{detail} (HTTP {})", resp.code)),
                }
            }
            other => ClusterError::Unavailable(format!("{context}: {other}")),
        }
    }
}
