//! nexus-manager CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the nexus-manager operator.

pub mod condition;
pub mod host;
pub mod host_defaults;
pub mod labels;

pub use condition::*;
pub use host::*;
pub use host_defaults::*;

use kube::CustomResourceExt;

/// Every CRD of the operator as one YAML stream.
pub fn crd_manifests() -> Result<String, serde_yaml::Error> {
    let mut out = String::new();
    for crd in [Host::crd(), HostDefaults::crd()] {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}
