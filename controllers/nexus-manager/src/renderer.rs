//! Desired-state renderer
//!
//! Pure mapping from a Host and the active defaults to the Generated
//! Workload Set. No I/O. Output only uses ordered maps, so identical inputs
//! serialize to identical bytes.

use std::collections::BTreeMap;

use cluster_client::GeneratedObject;
use crds::labels::{APP_INSTANCE, APP_NAME, HOST_ID, HOST_MANAGER, MANAGED_BY, OPERATOR_NAME, RENDERED_HASH};
use crds::{Host, HostResources, ResourceAmounts};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::defaults::ResolvedDefaults;
use crate::error::ControllerError;

/// Name of the host-manager container and suffix of generated object names
pub const CONTAINER_NAME: &str = "host-manager";
/// Name of the container and Service port
pub const PORT_NAME: &str = "http";
/// Env vars the operator always sets; overrides cannot replace them
pub const RESERVED_ENV: [&str; 2] = ["HOST_ID", "HOST_NAME"];

/// Deterministic name of every object generated for `host_name`.
pub fn workload_name(host_name: &str) -> String {
    format!("{host_name}-{CONTAINER_NAME}")
}

/// Desired Generated Workload Set for one Host.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedHost {
    pub deployment: Deployment,
    pub service: Option<Service>,
    pub image: String,
    pub replicas: i32,
}

impl RenderedHost {
    /// Every desired object, Deployment first.
    pub fn objects(&self) -> Vec<GeneratedObject> {
        let mut objects = vec![GeneratedObject::Deployment(self.deployment.clone())];
        objects.extend(self.service.clone().map(GeneratedObject::Service));
        objects
    }

    pub fn deployment_name(&self) -> Option<String> {
        self.deployment.metadata.name.clone()
    }

    pub fn service_name(&self) -> Option<String> {
        self.service.as_ref().and_then(|s| s.metadata.name.clone())
    }
}

/// Host spec after layering over the defaults.
#[derive(Debug, Clone, PartialEq)]
struct MergedSpec {
    image: String,
    replicas: i32,
    port: i32,
    expose: bool,
    resources: HostResources,
    env: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    node_selector: BTreeMap<String, String>,
    image_pull_policy: Option<String>,
}

fn invalid(msg: impl Into<String>) -> ControllerError {
    ControllerError::InvalidSpec(msg.into())
}

/// Host value wins when set; the default fills the rest. Maps merge key by key.
fn merge(host: &Host, host_name: &str, defaults: &ResolvedDefaults) -> Result<MergedSpec, ControllerError> {
    let spec = &host.spec;
    let overrides = spec.overrides.clone().unwrap_or_default();

    if spec.host_id.trim().is_empty() {
        return Err(invalid("spec.hostId: must not be empty"));
    }
    let image = spec
        .image
        .clone()
        .or_else(|| defaults.image.clone())
        .filter(|i| !i.trim().is_empty())
        .ok_or_else(|| invalid("spec.image: not set and no default image is configured"))?;
    let replicas = spec.replicas.unwrap_or(defaults.replicas);
    if replicas < 0 {
        return Err(invalid(format!("spec.replicas: must not be negative (got {replicas})")));
    }
    let port = spec.port.unwrap_or(defaults.port);
    if !(1..=65535).contains(&port) {
        return Err(invalid(format!("spec.port: must be between 1 and 65535 (got {port})")));
    }

    let mut env = defaults.env.clone();
    env.extend(overrides.env);
    env.insert("HOST_ID".to_string(), spec.host_id.clone());
    env.insert("HOST_NAME".to_string(), host_name.to_string());

    Ok(MergedSpec {
        image,
        replicas,
        port,
        expose: spec.expose.unwrap_or(defaults.expose),
        resources: spec
            .resources
            .clone()
            .unwrap_or_default()
            .merged_over(defaults.resources.as_ref()),
        env,
        labels: overrides.labels,
        annotations: overrides.annotations,
        node_selector: overrides.node_selector,
        image_pull_policy: overrides
            .image_pull_policy
            .or_else(|| defaults.image_pull_policy.clone()),
    })
}

/// Render the Generated Workload Set for `host`.
///
/// Fails with `InvalidSpec` when a required field is still missing after
/// the defaults are applied.
pub fn render(host: &Host, defaults: &ResolvedDefaults) -> Result<RenderedHost, ControllerError> {
    let host_name = host
        .meta()
        .name
        .clone()
        .ok_or_else(|| invalid("metadata.name: missing"))?;
    let namespace = host
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| invalid("metadata.namespace: missing"))?;
    let owner = host
        .controller_owner_ref(&())
        .ok_or_else(|| invalid("metadata.uid: missing"))?;
    let merged = merge(host, &host_name, defaults)?;

    let selector = selector_labels(&host_name);
    let mut labels = merged.labels.clone();
    labels.extend(selector.clone());
    labels.insert(MANAGED_BY.to_string(), OPERATOR_NAME.to_string());
    labels.insert(HOST_ID.to_string(), host.spec.host_id.clone());

    let name = workload_name(&host_name);
    let metadata = ObjectMeta {
        name: Some(name),
        namespace: Some(namespace),
        labels: Some(labels.clone()),
        owner_references: Some(vec![owner]),
        ..Default::default()
    };

    let mut deployment = render_deployment(metadata.clone(), &merged, selector.clone(), labels);
    stamp_rendered_hash(&mut deployment)?;
    let service = if merged.expose {
        let mut service = render_service(metadata, &merged, selector);
        stamp_rendered_hash(&mut service)?;
        Some(service)
    } else {
        None
    };

    Ok(RenderedHost {
        deployment,
        service,
        image: merged.image,
        replicas: merged.replicas,
    })
}

/// Records a digest of the rendered object in its annotations. Any change
/// to the desired state, including a removed field, changes the digest, so
/// the live object stops matching and the next apply prunes what was dropped.
fn stamp_rendered_hash<K: Resource + Serialize>(object: &mut K) -> Result<(), ControllerError> {
    let bytes = serde_json::to_vec(&*object)
        .map_err(|e| ControllerError::Unavailable(format!("serialize rendered object: {e}")))?;
    let digest = Sha256::digest(&bytes);
    object
        .meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(RENDERED_HASH.to_string(), hex::encode(&digest[..16]));
    Ok(())
}

fn selector_labels(host_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_NAME.to_string(), HOST_MANAGER.to_string()),
        (APP_INSTANCE.to_string(), host_name.to_string()),
    ])
}

fn non_empty<K, V>(map: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    (!map.is_empty()).then_some(map)
}

fn quantities(amounts: Option<&ResourceAmounts>) -> Option<BTreeMap<String, Quantity>> {
    let amounts = amounts?;
    let mut out = BTreeMap::new();
    if let Some(cpu) = &amounts.cpu {
        out.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &amounts.memory {
        out.insert("memory".to_string(), Quantity(memory.clone()));
    }
    non_empty(out)
}

fn render_deployment(
    metadata: ObjectMeta,
    merged: &MergedSpec,
    selector: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
) -> Deployment {
    let resources = ResourceRequirements {
        requests: quantities(merged.resources.requests.as_ref()),
        limits: quantities(merged.resources.limits.as_ref()),
        ..Default::default()
    };
    let has_resources = resources.requests.is_some() || resources.limits.is_some();

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(merged.image.clone()),
        image_pull_policy: merged.image_pull_policy.clone(),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: merged.port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(
            merged
                .env
                .iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    // The API server drops an empty value, so render it absent
                    value: (!value.is_empty()).then(|| value.clone()),
                    ..Default::default()
                })
                .collect(),
        ),
        resources: has_resources.then_some(resources),
        ..Default::default()
    };

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(merged.replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: non_empty(merged.annotations.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: non_empty(merged.node_selector.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn render_service(metadata: ObjectMeta, merged: &MergedSpec, selector: BTreeMap<String, String>) -> Service {
    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: merged.port,
                target_port: Some(IntOrString::String(PORT_NAME.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
