//! Kubernetes-backed object store client
//!
//! Reads and writes Hosts and their generated Deployments and Services
//! through the API server. Writes to generated objects use server-side apply
//! under the operator's field manager, with the live resourceVersion sent as
//! a precondition.

use std::fmt::Debug;

use crds::{Host, HostStatus};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    Api, DeleteParams, ListParams, Patch, PatchParams, Preconditions, PropagationPolicy,
};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::object::{EventSeverity, GeneratedObject, HostEvent, ObjectKind};

/// Field manager recorded on every write the operator makes.
pub const FIELD_MANAGER: &str = "nexus-manager";

/// Object store client backed by a kube `Client`
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    recorder: Recorder,
}

impl ClusterClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `client` - kube client used for every call
    /// * `instance` - reporting instance shown on published events (usually the pod name)
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.to_string(),
            instance,
        };
        let recorder = Recorder::new(client.clone(), reporter);
        Self { client, recorder }
    }

    fn hosts(&self, namespace: &str) -> Api<Host> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn typed<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn list_typed<K>(&self, namespace: &str) -> Result<Vec<K>, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let context = format!("list {} in {namespace}", K::kind(&()));
        self.typed::<K>(namespace)
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::from_kube(e, &context))
    }

    /// Creates `object` through server-side apply, so the create and every
    /// later apply share one field manager and fields dropped from the
    /// desired state get pruned. Fails with `AlreadyExists` when an object of
    /// that name is already present.
    async fn create_typed<K>(&self, object: &K) -> Result<K, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let context = format!("create {} {namespace}/{name}", K::kind(&()));
        let api = self.typed::<K>(&namespace);
        let existing = api
            .get_metadata_opt(&name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &context))?;
        if existing.is_some() {
            return Err(ClusterError::AlreadyExists(format!("{context}: object exists")));
        }
        // Not forced: an object created under another manager in between surfaces as a conflict
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(object))
            .await
            .map_err(|e| ClusterError::from_kube(e, &context))
    }

    async fn apply_typed<K>(&self, object: &K) -> Result<K, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let context = format!("apply {} {namespace}/{name}", K::kind(&()));
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.typed::<K>(&namespace)
            .patch(&name, &params, &Patch::Apply(object))
            .await
            .map_err(|e| ClusterError::from_kube(e, &context))
    }

    async fn delete_typed<K>(&self, object: &K) -> Result<(), ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let context = format!("delete {} {namespace}/{name}", K::kind(&()));
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: object.resource_version(),
                uid: object.uid(),
            }),
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        self.typed::<K>(&namespace)
            .delete(&name, &params)
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::from_kube(e, &context))
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for ClusterClient {
    async fn get_host(&self, namespace: &str, name: &str) -> Result<Option<Host>, ClusterError> {
        self.hosts(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("get Host {namespace}/{name}")))
    }

    async fn list_owned(&self, namespace: &str, owner_uid: &str) -> Result<Vec<GeneratedObject>, ClusterError> {
        let deployments = self.list_typed::<Deployment>(namespace).await?;
        let services = self.list_typed::<Service>(namespace).await?;

        let owned: Vec<GeneratedObject> = deployments
            .into_iter()
            .map(GeneratedObject::Deployment)
            .chain(services.into_iter().map(GeneratedObject::Service))
            .filter(|object| object.is_owned_by(owner_uid))
            .collect();

        debug!(namespace = %namespace, owner = %owner_uid, count = owned.len(), "Listed owned objects");
        Ok(owned)
    }

    async fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<GeneratedObject>, ClusterError> {
        let context = format!("get {kind} {namespace}/{name}");
        let found = match kind {
            ObjectKind::Deployment => self
                .typed::<Deployment>(namespace)
                .get_opt(name)
                .await
                .map(|o| o.map(GeneratedObject::Deployment)),
            ObjectKind::Service => self
                .typed::<Service>(namespace)
                .get_opt(name)
                .await
                .map(|o| o.map(GeneratedObject::Service)),
        };
        found.map_err(|e| ClusterError::from_kube(e, &context))
    }

    async fn create(&self, object: &GeneratedObject) -> Result<GeneratedObject, ClusterError> {
        match object {
            GeneratedObject::Deployment(d) => self.create_typed(d).await.map(GeneratedObject::Deployment),
            GeneratedObject::Service(s) => self.create_typed(s).await.map(GeneratedObject::Service),
        }
    }

    async fn apply(&self, object: &GeneratedObject) -> Result<GeneratedObject, ClusterError> {
        match object {
            GeneratedObject::Deployment(d) => self.apply_typed(d).await.map(GeneratedObject::Deployment),
            GeneratedObject::Service(s) => self.apply_typed(s).await.map(GeneratedObject::Service),
        }
    }

    async fn delete(&self, object: &GeneratedObject) -> Result<(), ClusterError> {
        match object {
            GeneratedObject::Deployment(d) => self.delete_typed(d).await,
            GeneratedObject::Service(s) => self.delete_typed(s).await,
        }
    }

    async fn patch_host_status(&self, namespace: &str, name: &str, status: &HostStatus) -> Result<(), ClusterError> {
        // Merge patch: absent keys would be left untouched, so cleared fields go out as null.
        let patch = json!({
            "status": {
                "observedGeneration": status.observed_generation,
                "conditions": status.conditions,
                "deploymentName": status.deployment_name,
                "serviceName": status.service_name,
                "renderedImage": status.rendered_image,
                "renderedReplicas": status.rendered_replicas,
                "availableReplicas": status.available_replicas,
            }
        });
        self.hosts(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("patch status of Host {namespace}/{name}")))?;
        Ok(())
    }

    async fn publish_event(&self, host: &Host, event: &HostEvent) -> Result<(), ClusterError> {
        let type_ = match event.severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };
        let reference = host.object_ref(&());
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason.clone(),
                    note: Some(event.note.clone()),
                    action: event.action.clone(),
                    secondary: None,
                },
                &reference,
            )
            .await
            .map_err(|e| {
                warn!(host = %host.name_any(), reason = %event.reason, error = %e, "Failed to publish event");
                ClusterError::from_kube(e, &format!("publish event on Host {}", host.name_any()))
            })
    }
}
