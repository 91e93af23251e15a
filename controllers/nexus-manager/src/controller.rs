//! Main controller implementation.
//!
//! Wires the object store client, the defaults store, the reconciler and
//! the HTTP listeners together, then runs until shutdown or until one of
//! the tasks fails.

use std::sync::Arc;

use cluster_client::ClusterClient;
use kube::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::defaults::DefaultsStore;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{BackoffSettings, Reconciler};
use crate::server::{self, ProbeState};
use crate::watcher::Watcher;
use crate::webhook::WebhookState;

/// Main controller for Host resources.
#[derive(Debug)]
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    http_server: JoinHandle<Result<(), ControllerError>>,
    webhook_server: JoinHandle<Result<(), ControllerError>>,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config, cancel: CancellationToken) -> Result<Self, ControllerError> {
        info!("Initializing nexus-manager");

        let kube_client = Client::try_default()
            .await
            .map_err(|e| ControllerError::InvalidConfig(format!("Kubernetes client: {e}")))?;
        let cluster_client = ClusterClient::new(kube_client.clone(), config.instance.clone());

        let defaults = Arc::new(DefaultsStore::new(config.builtin.clone(), config.defaults_name.clone()));
        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {e}")))?,
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(cluster_client),
            Arc::clone(&defaults),
            Arc::clone(&metrics),
            BackoffSettings {
                min: config.backoff_min,
                max: config.backoff_max,
                resync: config.resync,
            },
            cancel.clone(),
        ));

        let watcher = {
            let watcher = Watcher::new(
                kube_client,
                reconciler,
                Arc::clone(&defaults),
                config.watch_namespace.clone(),
                config.concurrency,
                config.debounce,
            );
            let cancel = cancel.clone();
            tokio::spawn(async move { watcher.run(cancel).await })
        };

        let http_server = {
            let state = Arc::new(ProbeState {
                defaults: Arc::clone(&defaults),
                metrics,
            });
            tokio::spawn(server::serve_http(config.http_addr, state, cancel.clone()))
        };

        let webhook_server = {
            let state = Arc::new(WebhookState { defaults });
            tokio::spawn(server::serve_webhook(
                config.webhook_addr,
                config.webhook_tls.clone(),
                state,
                cancel.clone(),
            ))
        };

        Ok(Self {
            watcher,
            http_server,
            webhook_server,
            cancel,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("nexus-manager running");

        // Whichever task ends first stops the others
        let result = tokio::select! {
            result = &mut self.watcher => flatten("Host watcher", result),
            result = &mut self.http_server => flatten("probe server", result),
            result = &mut self.webhook_server => flatten("webhook server", result),
        };
        self.cancel.cancel();

        for (name, handle) in [
            ("Host watcher", self.watcher),
            ("probe server", self.http_server),
            ("webhook server", self.webhook_server),
        ] {
            if handle.is_finished() {
                continue;
            }
            if let Err(e) = flatten(name, handle.await) {
                error!(task = name, error = %e, "Task failed during shutdown");
            }
        }
        result
    }
}

fn flatten(
    name: &str,
    joined: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    joined.map_err(|e| ControllerError::Watch(format!("{name} panicked: {e}")))?
}
