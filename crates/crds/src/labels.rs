//! Label and annotation keys and values stamped on every generated object.

/// Well-known application name label
pub const APP_NAME: &str = "app.kubernetes.io/name";
/// Instance label, set to the Host name
pub const APP_INSTANCE: &str = "app.kubernetes.io/instance";
/// Managed-by label
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Host identity label
pub const HOST_ID: &str = "nexus.io/host-id";
/// Annotation holding a digest of the rendered object
pub const RENDERED_HASH: &str = "nexus.io/rendered-hash";

/// Value of [`APP_NAME`] on generated objects
pub const HOST_MANAGER: &str = "host-manager";
/// Value of [`MANAGED_BY`] and the server-side apply field manager
pub const OPERATOR_NAME: &str = "nexus-manager";
