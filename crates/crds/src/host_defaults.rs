//! HostDefaults CRD
//!
//! Cluster-wide default configuration for Host objects. One object, selected
//! by name through process configuration, is active at a time.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::host::HostResources;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "nexus.io",
    version = "v1alpha1",
    kind = "HostDefaults",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct HostDefaultsSpec {
    /// Default host-manager image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Default replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Default requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<HostResources>,

    /// Default container port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Whether Services are rendered by default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose: Option<bool>,

    /// Environment variables added to every host-manager
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Default image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}
