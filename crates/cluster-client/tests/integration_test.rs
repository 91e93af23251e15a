//! Integration tests for the cluster client
//!
//! These tests require a reachable cluster with the Host CRD installed.
//! Set KUBECONFIG (or run in-cluster) and TEST_NAMESPACE to run.

use cluster_client::{ClusterClient, ClusterClientTrait, ClusterError, GeneratedObject, ObjectKind};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

fn namespace() -> String {
    std::env::var("TEST_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

async fn client() -> ClusterClient {
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create kube client");
    ClusterClient::new(client, Some("integration-test".to_string()))
}

fn service(name: &str) -> GeneratedObject {
    GeneratedObject::Service(Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: 8080,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_missing_host_is_none() {
    let client = client().await;
    let host = client
        .get_host(&namespace(), "nexus-integration-missing")
        .await
        .expect("Failed to query Host");
    assert!(host.is_none());
}

#[tokio::test]
#[ignore]
async fn test_create_conflict_and_delete() {
    let client = client().await;
    let ns = namespace();
    let name = "nexus-integration-svc";

    let created = client.create(&service(name)).await.expect("Failed to create service");

    let err = client.create(&service(name)).await.unwrap_err();
    assert!(matches!(err, ClusterError::AlreadyExists(_)), "got {err:?}");

    // A stale resourceVersion must be refused
    let mut stale = service(name);
    stale.meta_mut().resource_version = Some("1".to_string());
    let err = client.apply(&stale).await.unwrap_err();
    assert!(matches!(err, ClusterError::Conflict(_)), "got {err:?}");

    client.delete(&created).await.expect("Failed to delete service");
    let gone = client
        .get_object(ObjectKind::Service, &ns, name)
        .await
        .expect("Failed to query service");
    assert!(gone.is_none());
}
