//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use std::sync::Arc;
use std::time::Duration;

use cluster_client::MockClusterClient;
use crds::{Host, HostSpec};
use tokio_util::sync::CancellationToken;

use crate::config::BuiltinDefaults;
use crate::defaults::{DefaultsStore, ResolvedDefaults};
use crate::metrics::Metrics;
use crate::reconciler::{BackoffSettings, Reconciler};

/// Namespace used by every test Host
pub const NAMESPACE: &str = "default";

/// Built-in defaults matching the scenario in the operator docs:
/// image `host-manager:stable`, one replica
pub fn builtin_defaults() -> BuiltinDefaults {
    BuiltinDefaults {
        image: Some("host-manager:stable".to_string()),
        replicas: 1,
        port: 8080,
        expose: true,
    }
}

pub fn resolved_defaults() -> ResolvedDefaults {
    ResolvedDefaults::builtin(&builtin_defaults())
}

/// Helper to create a test Host with uid and generation set
pub fn create_test_host(name: &str, spec: HostSpec) -> Host {
    let mut host = Host::new(name, spec);
    host.metadata.namespace = Some(NAMESPACE.to_string());
    host.metadata.uid = Some(format!("{name}-uid"));
    host.metadata.generation = Some(1);
    host
}

/// Spec with only the identity set
pub fn minimal_spec(host_id: &str) -> HostSpec {
    HostSpec {
        host_id: host_id.to_string(),
        ..Default::default()
    }
}

/// Loaded defaults store serving [`builtin_defaults`]
pub fn create_test_defaults_store() -> Arc<DefaultsStore> {
    let store = DefaultsStore::new(builtin_defaults(), "default");
    store.replace(None);
    Arc::new(store)
}

/// Reconciler wired to `mock` with the test defaults
pub fn create_test_reconciler(mock: &MockClusterClient) -> Reconciler {
    create_test_reconciler_with(mock, create_test_defaults_store(), CancellationToken::new())
}

/// Reconciler wired to `mock`, reading `defaults` and observing `cancel`
pub fn create_test_reconciler_with(
    mock: &MockClusterClient,
    defaults: Arc<DefaultsStore>,
    cancel: CancellationToken,
) -> Reconciler {
    let metrics = Arc::new(Metrics::new().unwrap());
    Reconciler::new(
        Arc::new(mock.clone()),
        defaults,
        metrics,
        BackoffSettings {
            min: Duration::from_secs(1),
            max: Duration::from_secs(300),
            resync: Duration::from_secs(300),
        },
        cancel,
    )
}
