//! Host CRD
//!
//! Declares a host-manager deployment for one managed host. The operator
//! renders the workload set from the spec and reports progress on the status.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::{ConditionStatus, HostCondition};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "nexus.io",
    version = "v1alpha1",
    kind = "Host",
    namespaced,
    status = "HostStatus",
    derive = "PartialEq",
    shortname = "nxh",
    printcolumn = r#"{"name":"Host ID","type":"string","jsonPath":".spec.hostId"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.renderedImage"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    /// Identity of the managed host
    #[serde(default)]
    pub host_id: String,

    /// Container image for the host-manager workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Desired replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Resource requests and limits, merged field-by-field with defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<HostResources>,

    /// Container port of the host-manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Whether a ClusterIP Service is rendered for the host-manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose: Option<bool>,

    /// Partial overrides merged onto the cluster defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<HostOverrides>,

    /// Name of the HostDefaults object applied at admission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults_ref: Option<String>,
}

/// Requests and limits for the host-manager container.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceAmounts>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceAmounts>,
}

/// CPU and memory quantities in Kubernetes notation (e.g. `250m`, `128Mi`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAmounts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceAmounts {
    /// Fills every unset field from `fallback`.
    #[must_use]
    pub fn merged_over(&self, fallback: Option<&ResourceAmounts>) -> ResourceAmounts {
        ResourceAmounts {
            cpu: self.cpu.clone().or_else(|| fallback.and_then(|f| f.cpu.clone())),
            memory: self
                .memory
                .clone()
                .or_else(|| fallback.and_then(|f| f.memory.clone())),
        }
    }

    /// True when neither quantity is set.
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }
}

impl HostResources {
    /// Field-by-field merge: values set here win, `fallback` fills the gaps.
    #[must_use]
    pub fn merged_over(&self, fallback: Option<&HostResources>) -> HostResources {
        let merge = |own: Option<&ResourceAmounts>, other: Option<&ResourceAmounts>| {
            let merged = own.cloned().unwrap_or_default().merged_over(other);
            (!merged.is_empty()).then_some(merged)
        };
        HostResources {
            requests: merge(
                self.requests.as_ref(),
                fallback.and_then(|f| f.requests.as_ref()),
            ),
            limits: merge(self.limits.as_ref(), fallback.and_then(|f| f.limits.as_ref())),
        }
    }
}

/// Partial overrides applied on top of the cluster defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostOverrides {
    /// Extra environment variables; a key here replaces the default of the same name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Extra labels for the generated objects and pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations for the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Node selector for the host-manager pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    /// Generation of the spec the last pass rendered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Condition records of the last reconciliation pass
    #[serde(default)]
    pub conditions: Vec<HostCondition>,

    /// Name of the generated Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    /// Name of the generated Service, when exposed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Image of the last rendered Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_image: Option<String>,

    /// Replica count of the last rendered Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_replicas: Option<i32>,

    /// Available replicas reported by the live Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,
}

impl HostStatus {
    /// Looks up a condition by type.
    pub fn condition(&self, type_: &str) -> Option<&HostCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// True when the `Ready` condition is `True`.
    pub fn is_ready(&self) -> bool {
        self.condition(crate::condition::READY)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}
