//! Reconciliation logic for Host resources.
//!
//! One pass re-derives everything from current cluster state: fetch the
//! Host, list the objects it owns, render, diff, write, report. The trigger
//! that started the pass is never trusted as a source of truth.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use cluster_client::{ClusterClientTrait, ClusterError, GeneratedObject};
use crds::Host;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::defaults::DefaultsStore;
use crate::diff;
use crate::error::{ControllerError, ErrorKind};
use crate::metrics::Metrics;
use crate::renderer::render;
use crate::reporter::{self, AppliedWrite, PassReport, WriteOp};

/// Requeue timing.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSettings {
    pub min: Duration,
    pub max: Duration,
    /// Requeue after a successful pass
    pub resync: Duration,
}

/// Backoff state for a Host
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(settings: &BackoffSettings) -> Self {
        Self {
            backoff: ExponentialBackoff::new(settings.min, settings.max),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) -> Duration {
        self.error_count += 1;
        self.backoff.next_backoff()
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// How a pass ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassEnd {
    /// The Host is gone or being deleted
    Gone,
    /// The workload set matches the rendered state
    Converged,
}

/// Reconciles Host resources.
pub struct Reconciler {
    client: Arc<dyn ClusterClientTrait>,
    defaults: Arc<DefaultsStore>,
    metrics: Arc<Metrics>,
    settings: BackoffSettings,
    cancel: CancellationToken,
    /// Error count tracking per Host (namespace/name -> BackoffState)
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn host_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        defaults: Arc<DefaultsStore>,
        metrics: Arc<Metrics>,
        settings: BackoffSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            defaults,
            metrics,
            settings,
            cancel,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one reconciliation pass for the Host `namespace/name`.
    ///
    /// Until the cluster defaults have loaded nothing is rendered; the Host
    /// is requeued after the minimum backoff instead.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        if !self.defaults.is_loaded() {
            debug!(host = %name, namespace = %namespace, "Cluster defaults not loaded, requeueing");
            return Ok(Action::requeue(self.settings.min));
        }
        let started = Instant::now();
        debug!(host = %name, namespace = %namespace, "Reconciling Host");

        let result = self.reconcile_pass(namespace, name).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind().as_str(),
        };
        self.metrics.record_pass(outcome, started.elapsed());

        let key = host_key(namespace, name);
        Ok(match result? {
            PassEnd::Gone => {
                self.forget(&key);
                Action::await_change()
            }
            PassEnd::Converged => {
                self.reset_backoff(&key);
                Action::requeue(self.settings.resync)
            }
        })
    }

    /// Requeue decision for a failed pass.
    pub fn error_policy(&self, namespace: &str, name: &str, err: &ControllerError) -> Action {
        let key = host_key(namespace, name);
        match err.kind() {
            ErrorKind::Conflict => {
                debug!(host = %key, error = %err, "Conflict, requeueing immediately");
                Action::requeue(Duration::ZERO)
            }
            ErrorKind::InvalidSpec => {
                warn!(host = %key, error = %err, "Invalid spec, waiting for an edit");
                Action::await_change()
            }
            ErrorKind::Cancelled => Action::await_change(),
            ErrorKind::Unavailable | ErrorKind::NameConflict | ErrorKind::Fatal => {
                let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
                let state = states
                    .entry(key.clone())
                    .or_insert_with(|| BackoffState::new(&self.settings));
                let delay = state.increment_error();
                warn!(
                    host = %key,
                    error = %err,
                    attempt = state.error_count,
                    backoff_secs = delay.as_secs(),
                    "Reconciliation failed, backing off"
                );
                Action::requeue(delay)
            }
        }
    }

    fn reset_backoff(&self, key: &str) {
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(key) {
            if state.error_count > 0 {
                info!(host = %key, errors = state.error_count, "Recovered, backoff reset");
                state.reset();
            }
        }
    }

    /// Drops the backoff state of a Host that is gone.
    fn forget(&self, key: &str) {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Resolves `fut` unless shutdown wins the race; a cancelled call is
    /// never polled, so no write is half-issued.
    async fn cancellable<T>(&self, fut: impl Future<Output = T>) -> Result<T, ControllerError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ControllerError::Cancelled),
            out = fut => Ok(out),
        }
    }

    async fn reconcile_pass(&self, namespace: &str, name: &str) -> Result<PassEnd, ControllerError> {
        let host = self.cancellable(self.client.get_host(namespace, name)).await??;
        let Some(host) = host else {
            debug!(host = %name, namespace = %namespace, "Host not found, nothing to do");
            return Ok(PassEnd::Gone);
        };
        if host.metadata.deletion_timestamp.is_some() {
            debug!(host = %name, namespace = %namespace, "Host is being deleted, nothing to do");
            return Ok(PassEnd::Gone);
        }

        let outcome = self.converge(&host).await;
        if matches!(outcome, Err(ControllerError::Cancelled)) {
            return Err(ControllerError::Cancelled);
        }

        let reported = self
            .cancellable(reporter::report(self.client.as_ref(), &host, &outcome, Utc::now()))
            .await?;
        match (reported, outcome) {
            (Ok(()), Ok(report)) => {
                if !report.writes.is_empty() {
                    info!(host = %name, namespace = %namespace, writes = report.writes.len(), "Host reconciled");
                }
                Ok(PassEnd::Converged)
            }
            (Err(e), Ok(_)) => Err(e.into()),
            (Err(e), Err(err)) => {
                warn!(host = %name, namespace = %namespace, error = %e, "Failed to report failure status");
                Err(err)
            }
            (Ok(()), Err(err)) => Err(err),
        }
    }

    /// Steps 2-5 of a pass: list owned, render, diff, write.
    async fn converge(&self, host: &Host) -> Result<PassReport, ControllerError> {
        let namespace = host.namespace().unwrap_or_default();
        let uid = host
            .metadata
            .uid
            .clone()
            .ok_or_else(|| ControllerError::InvalidSpec("metadata.uid: missing".to_string()))?;

        let live = self.cancellable(self.client.list_owned(&namespace, &uid)).await??;
        let defaults = self.defaults.snapshot();
        let rendered = render(host, &defaults)?;
        let deployment_name = rendered.deployment_name();
        let mut available = live
            .iter()
            .find(|o| matches!(o, GeneratedObject::Deployment(_)) && Some(o.name()) == deployment_name.as_deref())
            .and_then(GeneratedObject::available_replicas);

        let plan = diff::plan(rendered.objects(), &live).map_err(|e| ControllerError::Unavailable(e.to_string()))?;
        if plan.is_empty() {
            debug!(host = %host.name_any(), unchanged = plan.unchanged, "Generated objects up to date");
        }

        let mut writes = Vec::new();
        for object in plan.create {
            if self.create(host, &uid, &object).await? {
                if matches!(object, GeneratedObject::Deployment(_)) {
                    available = None;
                }
                writes.push(self.record(WriteOp::Create, &object, Vec::new()));
            }
        }
        for (object, paths) in plan.update {
            if let Some(applied) = self.apply(&object, &paths).await? {
                if matches!(applied, GeneratedObject::Deployment(_)) {
                    available = applied.available_replicas();
                }
                writes.push(self.record(WriteOp::Update, &object, paths));
            }
        }
        for object in plan.delete {
            if self.delete(&object).await? {
                writes.push(self.record(WriteOp::Delete, &object, Vec::new()));
            }
        }

        Ok(PassReport {
            deployment_name,
            service_name: rendered.service_name(),
            image: rendered.image,
            replicas: rendered.replicas,
            available_replicas: available,
            writes,
        })
    }

    fn record(&self, op: WriteOp, object: &GeneratedObject, paths: Vec<String>) -> AppliedWrite {
        self.metrics.record_write(object.kind().as_str(), op.as_str());
        AppliedWrite {
            op,
            kind: object.kind(),
            name: object.name().to_string(),
            paths,
        }
    }

    /// Returns whether the object was written; `NotFound` counts as done.
    async fn create(&self, host: &Host, uid: &str, object: &GeneratedObject) -> Result<bool, ControllerError> {
        match self.cancellable(self.client.create(object)).await? {
            Ok(_) => {
                info!(host = %host.name_any(), kind = %object.kind(), object = %object.name(), "Created");
                Ok(true)
            }
            Err(ClusterError::AlreadyExists(_)) => Err(self.explain_taken_name(host, uid, object).await?),
            Err(ClusterError::NotFound(_)) => {
                debug!(object = %object.key(), "Namespace or owner gone, skipping create");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A create hit an existing name: either another pass raced us or a
    /// foreign object squats the generated name.
    async fn explain_taken_name(&self, host: &Host, uid: &str, object: &GeneratedObject) -> Result<ControllerError, ControllerError> {
        let existing = self
            .cancellable(self.client.get_object(object.kind(), object.namespace(), object.name()))
            .await??;
        Ok(match existing {
            Some(existing) if !existing.is_owned_by(uid) => ControllerError::NameConflict(format!(
                "{} {}/{} exists and is not owned by Host {}",
                object.kind(),
                object.namespace(),
                object.name(),
                host.name_any()
            )),
            _ => ControllerError::Conflict(format!("{} was created concurrently", object.key())),
        })
    }

    async fn apply(&self, object: &GeneratedObject, paths: &[String]) -> Result<Option<GeneratedObject>, ControllerError> {
        match self.cancellable(self.client.apply(object)).await? {
            Ok(applied) => {
                info!(kind = %object.kind(), object = %object.name(), paths = ?paths, "Updated");
                Ok(Some(applied))
            }
            Err(ClusterError::NotFound(_)) => {
                debug!(object = %object.key(), "Object deleted before update");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, object: &GeneratedObject) -> Result<bool, ControllerError> {
        match self.cancellable(self.client.delete(object)).await? {
            Ok(()) => {
                info!(kind = %object.kind(), object = %object.name(), "Deleted");
                Ok(true)
            }
            Err(ClusterError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
