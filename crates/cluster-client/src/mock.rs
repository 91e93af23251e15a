//! Mock ClusterClient for unit testing
//!
//! Keeps Hosts and generated objects in memory so the reconciler can be
//! driven without an API server. The mock enforces the same preconditions
//! the API server does (resourceVersion on apply/delete, name uniqueness on
//! create), records every write, and simulates owner-reference garbage
//! collection when a Host is deleted.
//!
//! Apply behaves like server-side apply under a single field manager: fields
//! the previous applied configuration set and the new one omits are removed,
//! then the submitted object is merged onto the stored one (maps merge key by
//! key, lists and scalars are replaced). Create records the first applied
//! configuration.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crds::{Host, HostSpec, HostStatus};
use k8s_openapi::api::apps::v1::DeploymentStatus;
use serde_json::Value;
use uuid::Uuid;

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::object::{GeneratedObject, HostEvent, ObjectKind};

/// Trait operation, used to target injected failures and to label writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetHost,
    ListOwned,
    GetObject,
    Create,
    Apply,
    Delete,
    PatchStatus,
    PublishEvent,
}

/// One successful write seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub op: Operation,
    /// `Kind/namespace/name`
    pub key: String,
    /// The object as submitted by the caller (`None` for status patches)
    pub submitted: Option<GeneratedObject>,
}

type ObjectKey = (ObjectKind, String, String);

/// Runs against the mock right before the operation it was registered for.
type Hook = Box<dyn FnOnce(&MockClusterClient) + Send>;

#[derive(Default)]
struct MockState {
    hosts: BTreeMap<(String, String), Host>,
    objects: BTreeMap<ObjectKey, GeneratedObject>,
    /// Last configuration written by the operator's field manager
    applied: BTreeMap<ObjectKey, Value>,
    writes: Vec<WriteRecord>,
    events: Vec<(String, HostEvent)>,
    failures: HashMap<Operation, VecDeque<ClusterError>>,
    next_version: u64,
}

impl MockState {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn new_uid() -> String {
        Uuid::new_v4().to_string()
    }

    fn take_failure(&mut self, op: Operation) -> Result<(), ClusterError> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
    hooks: Arc<Mutex<HashMap<Operation, VecDeque<Hook>>>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient").finish_non_exhaustive()
    }
}

fn object_key(object: &GeneratedObject) -> ObjectKey {
    (object.kind(), object.namespace().to_string(), object.name().to_string())
}

/// Removes from `target` the fields `previous` set and `current` no longer sets.
fn prune_json(target: &mut Value, previous: &Value, current: &Value) {
    let (Value::Object(target), Value::Object(previous)) = (target, previous) else {
        return;
    };
    for (key, previous_value) in previous {
        match current.get(key) {
            None => {
                target.remove(key);
            }
            Some(current_value) => {
                if let Some(existing) = target.get_mut(key) {
                    prune_json(existing, previous_value, current_value);
                }
            }
        }
    }
}

/// Recursive JSON merge: objects merge per key, everything else is replaced.
fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl MockClusterClient {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the next hook queued for `op`, outside the state lock.
    fn run_hook(&self, op: Operation) {
        let hook = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        if let Some(hook) = hook {
            hook(self);
        }
    }

    /// Add a Host (for test setup). Missing uid, generation and
    /// resourceVersion are filled in.
    pub fn add_host(&self, mut host: Host) -> Host {
        let mut state = self.state();
        let namespace = host.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = host.metadata.name.clone().unwrap_or_default();
        host.metadata.namespace = Some(namespace.clone());
        if host.metadata.uid.is_none() {
            host.metadata.uid = Some(MockState::new_uid());
        }
        host.metadata.generation.get_or_insert(1);
        host.metadata.resource_version = Some(state.bump_version());
        state.hosts.insert((namespace, name), host.clone());
        host
    }

    /// Edit a Host spec the way a user would; bumps generation.
    pub fn update_host_spec(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut HostSpec)) {
        let mut state = self.state();
        let version = state.bump_version();
        if let Some(host) = state.hosts.get_mut(&(namespace.to_string(), name.to_string())) {
            edit(&mut host.spec);
            host.metadata.generation = Some(host.metadata.generation.unwrap_or(0) + 1);
            host.metadata.resource_version = Some(version);
        }
    }

    /// Set a deletionTimestamp on a Host without removing it.
    pub fn mark_host_deleting(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        if let Some(host) = state.hosts.get_mut(&(namespace.to_string(), name.to_string())) {
            host.metadata.deletion_timestamp = serde_json::from_value(Value::from("2024-01-01T00:00:00Z")).ok();
        }
    }

    /// Delete a Host and garbage-collect every object it owns.
    pub fn delete_host(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        if let Some(host) = state.hosts.remove(&(namespace.to_string(), name.to_string())) {
            let uid = host.metadata.uid.unwrap_or_default();
            // The garbage collector follows every owner reference, controller or not
            state.objects.retain(|_, object| {
                !object
                    .meta()
                    .owner_references
                    .as_ref()
                    .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
            });
            let MockState { objects, applied, .. } = &mut *state;
            applied.retain(|key, _| objects.contains_key(key));
        }
    }

    /// Current stored Host.
    pub fn host(&self, namespace: &str, name: &str) -> Option<Host> {
        self.state().hosts.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Insert an object as another actor would; assigns uid and resourceVersion.
    pub fn insert_object(&self, mut object: GeneratedObject) -> GeneratedObject {
        let mut state = self.state();
        let uid = MockState::new_uid();
        let version = state.bump_version();
        let meta = object.meta_mut();
        meta.uid.get_or_insert(uid);
        meta.resource_version = Some(version);
        state.objects.insert(object_key(&object), object.clone());
        object
    }

    /// Modify a stored object out of band (an external writer); bumps resourceVersion.
    pub fn mutate_object(&self, kind: ObjectKind, namespace: &str, name: &str, edit: impl FnOnce(&mut GeneratedObject)) {
        let mut state = self.state();
        let version = state.bump_version();
        if let Some(object) = state.objects.get_mut(&(kind, namespace.to_string(), name.to_string())) {
            edit(object);
            object.meta_mut().resource_version = Some(version);
        }
    }

    /// Report rollout progress on a stored Deployment.
    pub fn set_available_replicas(&self, namespace: &str, name: &str, available: i32) {
        self.mutate_object(ObjectKind::Deployment, namespace, name, |object| {
            if let GeneratedObject::Deployment(d) = object {
                d.status.get_or_insert_with(DeploymentStatus::default).available_replicas = Some(available);
            }
        });
    }

    /// Current stored object.
    pub fn object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<GeneratedObject> {
        self.state().objects.get(&(kind, namespace.to_string(), name.to_string())).cloned()
    }

    /// Every stored object, ordered by kind, namespace and name.
    pub fn objects(&self) -> Vec<GeneratedObject> {
        self.state().objects.values().cloned().collect()
    }

    /// Run `hook` just before the next call of `op` reaches the store, e.g.
    /// to let another writer act between a pass's read and its write.
    pub fn before_next(&self, op: Operation, hook: impl FnOnce(&MockClusterClient) + Send + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default()
            .push_back(Box::new(hook));
    }

    /// Make the next call of `op` fail with `err`. Calls queue up per operation.
    pub fn fail_next(&self, op: Operation, err: ClusterError) {
        self.state().failures.entry(op).or_default().push_back(err);
    }

    /// Successful writes in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    /// Successful writes to generated objects (status patches excluded).
    pub fn object_writes(&self) -> Vec<WriteRecord> {
        self.writes()
            .into_iter()
            .filter(|w| w.op != Operation::PatchStatus)
            .collect()
    }

    /// Forget recorded writes and events.
    pub fn clear_writes(&self) {
        let mut state = self.state();
        state.writes.clear();
        state.events.clear();
    }

    /// Published events as `(host name, event)`.
    pub fn events(&self) -> Vec<(String, HostEvent)> {
        self.state().events.clone()
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_host(&self, namespace: &str, name: &str) -> Result<Option<Host>, ClusterError> {
        self.run_hook(Operation::GetHost);
        let mut state = self.state();
        state.take_failure(Operation::GetHost)?;
        Ok(state.hosts.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn list_owned(&self, namespace: &str, owner_uid: &str) -> Result<Vec<GeneratedObject>, ClusterError> {
        self.run_hook(Operation::ListOwned);
        let mut state = self.state();
        state.take_failure(Operation::ListOwned)?;
        Ok(state
            .objects
            .values()
            .filter(|o| o.namespace() == namespace && o.is_owned_by(owner_uid))
            .cloned()
            .collect())
    }

    async fn get_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<GeneratedObject>, ClusterError> {
        self.run_hook(Operation::GetObject);
        let mut state = self.state();
        state.take_failure(Operation::GetObject)?;
        Ok(state.objects.get(&(kind, namespace.to_string(), name.to_string())).cloned())
    }

    async fn create(&self, object: &GeneratedObject) -> Result<GeneratedObject, ClusterError> {
        self.run_hook(Operation::Create);
        let mut state = self.state();
        state.take_failure(Operation::Create)?;
        let key = object_key(object);
        if object.resource_version().is_some() {
            return Err(ClusterError::Rejected(format!(
                "create {}: resourceVersion should not be set on objects to be created",
                object.key()
            )));
        }
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("create {}", object.key())));
        }
        let mut stored = object.clone();
        let uid = MockState::new_uid();
        let version = state.bump_version();
        let meta = stored.meta_mut();
        meta.uid = Some(uid);
        meta.resource_version = Some(version);
        state.applied.insert(key.clone(), object.to_value()?);
        state.objects.insert(key, stored.clone());
        state.writes.push(WriteRecord {
            op: Operation::Create,
            key: object.key(),
            submitted: Some(object.clone()),
        });
        Ok(stored)
    }

    async fn apply(&self, object: &GeneratedObject) -> Result<GeneratedObject, ClusterError> {
        self.run_hook(Operation::Apply);
        let mut state = self.state();
        state.take_failure(Operation::Apply)?;
        let key = object_key(object);
        let Some(live) = state.objects.get(&key) else {
            return Err(ClusterError::NotFound(format!("apply {}", object.key())));
        };
        if let Some(expected) = object.resource_version() {
            if live.resource_version() != Some(expected) {
                return Err(ClusterError::Conflict(format!(
                    "apply {}: the object has been modified",
                    object.key()
                )));
            }
        }
        let submitted = object.to_value()?;
        let mut merged = live.to_value()?;
        if let Some(previous) = state.applied.get(&key) {
            prune_json(&mut merged, previous, &submitted);
        }
        merge_json(&mut merged, &submitted);
        let mut stored = GeneratedObject::from_value(object.kind(), merged)?;
        stored.meta_mut().resource_version = Some(state.bump_version());
        state.applied.insert(key.clone(), submitted);
        state.objects.insert(key, stored.clone());
        state.writes.push(WriteRecord {
            op: Operation::Apply,
            key: object.key(),
            submitted: Some(object.clone()),
        });
        Ok(stored)
    }

    async fn delete(&self, object: &GeneratedObject) -> Result<(), ClusterError> {
        self.run_hook(Operation::Delete);
        let mut state = self.state();
        state.take_failure(Operation::Delete)?;
        let key = object_key(object);
        let Some(live) = state.objects.get(&key) else {
            return Err(ClusterError::NotFound(format!("delete {}", object.key())));
        };
        let version_matches = object
            .resource_version()
            .is_none_or(|v| live.resource_version() == Some(v));
        let uid_matches = object.meta().uid.as_ref().is_none_or(|u| live.meta().uid.as_ref() == Some(u));
        if !version_matches || !uid_matches {
            return Err(ClusterError::Conflict(format!(
                "delete {}: precondition failed",
                object.key()
            )));
        }
        state.objects.remove(&key);
        state.applied.remove(&key);
        state.writes.push(WriteRecord {
            op: Operation::Delete,
            key: object.key(),
            submitted: Some(object.clone()),
        });
        Ok(())
    }

    async fn patch_host_status(&self, namespace: &str, name: &str, status: &HostStatus) -> Result<(), ClusterError> {
        self.run_hook(Operation::PatchStatus);
        let mut state = self.state();
        state.take_failure(Operation::PatchStatus)?;
        let version = state.bump_version();
        let Some(host) = state.hosts.get_mut(&(namespace.to_string(), name.to_string())) else {
            return Err(ClusterError::NotFound(format!("patch status of Host {namespace}/{name}")));
        };
        host.status = Some(status.clone());
        host.metadata.resource_version = Some(version);
        state.writes.push(WriteRecord {
            op: Operation::PatchStatus,
            key: format!("Host/{namespace}/{name}"),
            submitted: None,
        });
        Ok(())
    }

    async fn publish_event(&self, host: &Host, event: &HostEvent) -> Result<(), ClusterError> {
        self.run_hook(Operation::PublishEvent);
        let mut state = self.state();
        state.take_failure(Operation::PublishEvent)?;
        let name = host.metadata.name.clone().unwrap_or_default();
        state.events.push((name, event.clone()));
        Ok(())
    }
}
