//! ClusterClient trait for mocking
//!
//! This trait abstracts cluster access so the reconciler can be exercised
//! against an in-memory store in unit tests.

use crds::{Host, HostStatus};

use crate::error::ClusterError;
use crate::object::{GeneratedObject, HostEvent, ObjectKind};

/// Trait for object store operations used by a reconciliation pass
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Fetch a Host; `Ok(None)` when it does not exist.
    async fn get_host(&self, namespace: &str, name: &str) -> Result<Option<Host>, ClusterError>;

    /// Every generated object in `namespace` whose controller owner reference is `owner_uid`.
    async fn list_owned(&self, namespace: &str, owner_uid: &str) -> Result<Vec<GeneratedObject>, ClusterError>;

    /// Fetch one generated object by name; `Ok(None)` when it does not exist.
    async fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<GeneratedObject>, ClusterError>;

    /// Create an object under the operator's apply field manager; fails
    /// with `AlreadyExists` if the name is taken.
    async fn create(&self, object: &GeneratedObject) -> Result<GeneratedObject, ClusterError>;

    /// Server-side apply of the fields the operator owns.
    ///
    /// `metadata.resourceVersion` on `object` is sent as a precondition; a
    /// stale version fails with `Conflict`.
    async fn apply(&self, object: &GeneratedObject) -> Result<GeneratedObject, ClusterError>;

    /// Delete an object guarded by its resourceVersion and UID; `NotFound` when already gone.
    async fn delete(&self, object: &GeneratedObject) -> Result<(), ClusterError>;

    /// Replace the Host status through the status subresource.
    async fn patch_host_status(&self, namespace: &str, name: &str, status: &HostStatus) -> Result<(), ClusterError>;

    /// Record a cluster Event on the Host.
    async fn publish_event(&self, host: &Host, event: &HostEvent) -> Result<(), ClusterError>;
}
