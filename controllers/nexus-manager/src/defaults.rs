//! Cluster default configuration
//!
//! Holds the active defaults snapshot: the `HostDefaults` object selected by
//! name, layered over the built-in process defaults. The snapshot is
//! replaced wholesale whenever the watched object changes; readers take an
//! `Arc` and never observe a half-updated value.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crds::{HostDefaults, HostResources};
use kube::ResourceExt;
use kube_runtime::watcher;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::BuiltinDefaults;

/// Defaults after layering the HostDefaults object over the built-in values.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDefaults {
    /// Name of the HostDefaults object in effect, if any
    pub source: Option<String>,
    pub image: Option<String>,
    pub replicas: i32,
    pub resources: Option<HostResources>,
    pub port: i32,
    pub expose: bool,
    pub env: BTreeMap<String, String>,
    pub image_pull_policy: Option<String>,
}

impl ResolvedDefaults {
    pub fn builtin(builtin: &BuiltinDefaults) -> Self {
        Self::resolve(builtin, None)
    }

    /// Field-by-field: a value set on the object wins over the built-in one.
    pub fn resolve(builtin: &BuiltinDefaults, object: Option<&HostDefaults>) -> Self {
        let Some(object) = object else {
            return Self {
                source: None,
                image: builtin.image.clone(),
                replicas: builtin.replicas,
                resources: None,
                port: builtin.port,
                expose: builtin.expose,
                env: BTreeMap::new(),
                image_pull_policy: None,
            };
        };
        let spec = &object.spec;
        Self {
            source: Some(object.name_any()),
            image: spec.image.clone().or_else(|| builtin.image.clone()),
            replicas: spec.replicas.unwrap_or(builtin.replicas),
            resources: spec.resources.clone(),
            port: spec.port.unwrap_or(builtin.port),
            expose: spec.expose.unwrap_or(builtin.expose),
            env: spec.env.clone(),
            image_pull_policy: spec.image_pull_policy.clone(),
        }
    }
}

/// Shared, swappable defaults snapshot
#[derive(Debug)]
pub struct DefaultsStore {
    builtin: BuiltinDefaults,
    name: String,
    current: RwLock<Arc<ResolvedDefaults>>,
    /// Object seen during a watch (re)list, committed on `InitDone`
    relist: Mutex<Option<HostDefaults>>,
    /// Flips to true once, on the first completed listing
    loaded: watch::Sender<bool>,
}

impl DefaultsStore {
    /// Create a store serving the built-in defaults until the first load
    ///
    /// # Arguments
    /// * `builtin` - process defaults from the environment
    /// * `name` - name of the HostDefaults object to follow
    pub fn new(builtin: BuiltinDefaults, name: impl Into<String>) -> Self {
        let current = Arc::new(ResolvedDefaults::builtin(&builtin));
        Self {
            builtin,
            name: name.into(),
            current: RwLock::new(current),
            relist: Mutex::new(None),
            loaded: watch::Sender::new(false),
        }
    }

    /// Name of the followed HostDefaults object.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The snapshot in effect now.
    pub fn snapshot(&self) -> Arc<ResolvedDefaults> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// True once the HostDefaults watch has completed its first listing.
    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Resolves once the first listing has been committed.
    pub async fn wait_loaded(&self) {
        let mut loaded = self.loaded.subscribe();
        // Cannot fail: the sender lives as long as `self`
        let _ = loaded.wait_for(|loaded| *loaded).await;
    }

    /// Swap in the defaults derived from `object` (built-in only when `None`).
    /// Returns whether the snapshot changed.
    pub fn replace(&self, object: Option<&HostDefaults>) -> bool {
        let next = ResolvedDefaults::resolve(&self.builtin, object);
        self.loaded.send_if_modified(|loaded| !std::mem::replace(loaded, true));
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if **current == next {
            return false;
        }
        info!(source = ?next.source, image = ?next.image, "Cluster defaults changed");
        *current = Arc::new(next);
        true
    }

    /// Apply one HostDefaults watch event. Returns whether every Host needs
    /// a fresh pass.
    pub fn handle_event(&self, event: watcher::Event<HostDefaults>) -> bool {
        let mut relist = self.relist.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            watcher::Event::Init => {
                *relist = None;
                false
            }
            watcher::Event::InitApply(object) => {
                if object.name_any() == self.name {
                    *relist = Some(object);
                }
                false
            }
            watcher::Event::InitDone => {
                let object = relist.take();
                drop(relist);
                self.replace(object.as_ref())
            }
            watcher::Event::Apply(object) if object.name_any() == self.name => {
                drop(relist);
                self.replace(Some(&object))
            }
            watcher::Event::Delete(object) if object.name_any() == self.name => {
                drop(relist);
                self.replace(None)
            }
            watcher::Event::Apply(object) | watcher::Event::Delete(object) => {
                debug!(name = %object.name_any(), "Ignoring inactive HostDefaults");
                false
            }
        }
    }
}
