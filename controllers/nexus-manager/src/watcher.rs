//! Kubernetes resource watchers.
//!
//! Drives the [`Reconciler`] from `kube_runtime::Controller`, which provides
//! the work queue: one pass per Host at a time, coalesced triggers and a
//! bounded worker pool. Generated Deployments and Services are watched too,
//! so drift on them re-triggers their owning Host. A change to the active
//! HostDefaults triggers every Host. No Host is reconciled before the first
//! HostDefaults listing has been committed.

use std::sync::Arc;
use std::time::Duration;

use crds::{Host, HostDefaults, labels};
use futures::channel::mpsc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig, Error as RuntimeError};
use kube_runtime::{Controller, WatchStreamExt, watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::defaults::DefaultsStore;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;

/// Watches Hosts, their generated objects and the active HostDefaults.
pub struct Watcher {
    client: Client,
    reconciler: Arc<Reconciler>,
    defaults: Arc<DefaultsStore>,
    namespace: Option<String>,
    concurrency: u16,
    debounce: Duration,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("namespace", &self.namespace)
            .field("concurrency", &self.concurrency)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(
        client: Client,
        reconciler: Arc<Reconciler>,
        defaults: Arc<DefaultsStore>,
        namespace: Option<String>,
        concurrency: u16,
        debounce: Duration,
    ) -> Self {
        Self {
            client,
            reconciler,
            defaults,
            namespace,
            concurrency,
            debounce,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Runs until the process is signalled or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ControllerError> {
        info!(
            namespace = self.namespace.as_deref().unwrap_or("all namespaces"),
            concurrency = self.concurrency,
            debounce_ms = self.debounce.as_millis() as u64,
            "Starting Host controller"
        );

        let (defaults_tx, defaults_rx) = mpsc::channel::<()>(1);
        let defaults_watch = tokio::spawn(watch_defaults(
            self.client.clone(),
            Arc::clone(&self.defaults),
            defaults_tx,
            cancel.clone(),
        ));

        info!(name = %self.defaults.name(), "Waiting for cluster defaults");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                defaults_watch.abort();
                info!("Host controller cancelled before start");
                return Ok(());
            }
            () = self.defaults.wait_loaded() => info!("Cluster defaults loaded"),
        }

        // Only objects carrying the operator's label are of interest
        let owned = watcher::Config::default().labels(&format!("{}={}", labels::MANAGED_BY, labels::OPERATOR_NAME));
        let controller_config = ControllerConfig::default()
            .concurrency(self.concurrency)
            .debounce(self.debounce);

        let hosts: Api<Host> = self.api();
        let deployments: Api<Deployment> = self.api();
        let services: Api<Service> = self.api();

        let controller = Controller::new(hosts, watcher::Config::default())
            .owns(deployments, owned.clone())
            .owns(services, owned)
            .reconcile_all_on(defaults_rx)
            .with_config(controller_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::clone(&self.reconciler))
            .for_each(|res| async move {
                match res {
                    Ok((host, _)) => debug!(host = %host.name, namespace = ?host.namespace, "Reconciled"),
                    Err(RuntimeError::ReconcilerFailed(e, host)) => {
                        debug!(host = %host.name, namespace = ?host.namespace, error = %e, "Reconciliation failed");
                    }
                    Err(e) => warn!(error = %e, "Controller error"),
                }
            });

        tokio::select! {
            () = controller => info!("Host controller stopped"),
            () = cancel.cancelled() => info!("Host controller cancelled"),
        }
        defaults_watch.abort();
        Ok(())
    }
}

async fn reconcile(host: Arc<Host>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let namespace = host.namespace().unwrap_or_default();
    ctx.reconcile(&namespace, &host.name_any()).await
}

fn error_policy(host: Arc<Host>, err: &ControllerError, ctx: Arc<Reconciler>) -> Action {
    let namespace = host.namespace().unwrap_or_default();
    ctx.error_policy(&namespace, &host.name_any(), err)
}

/// Feeds HostDefaults changes into `store` and signals `changed` whenever
/// the snapshot moved.
async fn watch_defaults(
    client: Client,
    store: Arc<DefaultsStore>,
    mut changed: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    let api: Api<HostDefaults> = Api::all(client);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", store.name()));
    info!(name = %store.name(), "Watching HostDefaults");

    let mut events = watcher(api, config).default_backoff().boxed();
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            event = events.next() => event,
        };
        match event {
            Some(Ok(event)) => {
                if store.handle_event(event) {
                    // A full channel already holds a pending trigger
                    if let Err(e) = changed.try_send(()) {
                        if e.is_disconnected() {
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => warn!(error = %e, "HostDefaults watch error"),
            None => {
                error!("HostDefaults watch ended");
                return;
            }
        }
    }
}
