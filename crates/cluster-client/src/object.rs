//! Generated workload objects
//!
//! The closed set of object kinds the operator renders for a Host.

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Kind of a generated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Deployment,
    Service,
}

impl ObjectKind {
    /// Kubernetes kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Service => "Service",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object of the Generated Workload Set.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedObject {
    Deployment(Deployment),
    Service(Service),
}

impl GeneratedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            GeneratedObject::Deployment(_) => ObjectKind::Deployment,
            GeneratedObject::Service(_) => ObjectKind::Service,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            GeneratedObject::Deployment(d) => &d.metadata,
            GeneratedObject::Service(s) => &s.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            GeneratedObject::Deployment(d) => &mut d.metadata,
            GeneratedObject::Service(s) => &mut s.metadata,
        }
    }

    /// Object name, empty when unset.
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Object namespace, empty when unset.
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    /// `Kind/namespace/name`, for logs and error messages.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.kind(), self.namespace(), self.name())
    }

    /// True when the controller owner reference points at `owner_uid`.
    /// References without `controller: true` only tie the object to the
    /// owner for garbage collection and do not count.
    pub fn is_owned_by(&self, owner_uid: &str) -> bool {
        self.meta()
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.controller == Some(true) && r.uid == owner_uid))
    }

    /// JSON form of the object.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            GeneratedObject::Deployment(d) => serde_json::to_value(d),
            GeneratedObject::Service(s) => serde_json::to_value(s),
        }
    }

    /// Rebuilds an object of `kind` from JSON.
    #[cfg(any(test, feature = "test-util"))]
    pub fn from_value(kind: ObjectKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ObjectKind::Deployment => GeneratedObject::Deployment(serde_json::from_value(value)?),
            ObjectKind::Service => GeneratedObject::Service(serde_json::from_value(value)?),
        })
    }

    /// The live Deployment's available replica count, if reported.
    pub fn available_replicas(&self) -> Option<i32> {
        match self {
            GeneratedObject::Deployment(d) => d.status.as_ref().and_then(|s| s.available_replicas),
            GeneratedObject::Service(_) => None,
        }
    }
}

/// Severity of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// A human-readable progress event attached to a Host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub severity: EventSeverity,
    /// CamelCase reason shown by `kubectl get events`
    pub reason: String,
    /// What the operator did (e.g. `Reconcile`)
    pub action: String,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn owned_deployment(uid: &str) -> GeneratedObject {
        GeneratedObject::Deployment(Deployment {
            metadata: ObjectMeta {
                name: Some("h1-host-manager".to_string()),
                namespace: Some("default".to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "nexus.io/v1alpha1".to_string(),
                    kind: "Host".to_string(),
                    name: "h1".to_string(),
                    uid: uid.to_string(),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_ownership_matches_uid_only() {
        let object = owned_deployment("uid-1");
        assert!(object.is_owned_by("uid-1"));
        assert!(!object.is_owned_by("uid-2"));
    }

    #[test]
    fn test_non_controller_reference_is_not_ownership() {
        let mut object = owned_deployment("uid-1");
        if let Some(refs) = object.meta_mut().owner_references.as_mut() {
            refs[0].controller = None;
        }
        assert!(!object.is_owned_by("uid-1"));
    }

    #[test]
    fn test_key_includes_kind_namespace_and_name() {
        assert_eq!(owned_deployment("u").key(), "Deployment/default/h1-host-manager");
    }

    #[test]
    fn test_value_conversion_keeps_kind() {
        let object = owned_deployment("uid-1");
        let value = object.to_value().unwrap();
        assert_eq!(value["kind"], "Deployment");
        let back = GeneratedObject::from_value(ObjectKind::Deployment, value).unwrap();
        assert_eq!(back, object);
    }
}
