//! Unit tests for the desired-state renderer

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crds::{HostOverrides, HostResources, ResourceAmounts};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use crate::error::ControllerError;
    use crate::renderer::*;
    use crate::test_utils::*;

    fn env_of(rendered: &RenderedHost) -> Vec<(String, String)> {
        let pod = rendered.deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        pod.containers[0]
            .env
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_defaults_fill_unset_fields() {
        let host = create_test_host("h1", minimal_spec("host-1"));
        let rendered = render(&host, &resolved_defaults()).unwrap();

        assert_eq!(rendered.image, "host-manager:stable");
        assert_eq!(rendered.replicas, 1);
        assert_eq!(rendered.deployment_name().as_deref(), Some("h1-host-manager"));
        assert_eq!(rendered.service_name().as_deref(), Some("h1-host-manager"));

        let spec = rendered.deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("host-manager:stable"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
    }

    #[test]
    fn test_host_values_win_over_defaults() {
        let mut spec = minimal_spec("host-1");
        spec.image = Some("host-manager:v2".to_string());
        spec.replicas = Some(3);
        spec.port = Some(9000);
        spec.expose = Some(false);
        let rendered = render(&create_test_host("h1", spec), &resolved_defaults()).unwrap();

        assert_eq!(rendered.image, "host-manager:v2");
        assert_eq!(rendered.replicas, 3);
        assert!(rendered.service.is_none());
        assert_eq!(rendered.objects().len(), 1);
    }

    #[test]
    fn test_resources_merge_field_by_field() {
        let mut defaults = resolved_defaults();
        defaults.resources = Some(HostResources {
            requests: Some(ResourceAmounts {
                cpu: Some("100m".to_string()),
                memory: Some("64Mi".to_string()),
            }),
            limits: Some(ResourceAmounts {
                cpu: None,
                memory: Some("256Mi".to_string()),
            }),
        });
        let mut spec = minimal_spec("host-1");
        spec.resources = Some(HostResources {
            requests: Some(ResourceAmounts {
                cpu: Some("250m".to_string()),
                memory: None,
            }),
            limits: None,
        });

        let rendered = render(&create_test_host("h1", spec), &defaults).unwrap();
        let pod = rendered.deployment.spec.unwrap().template.spec.unwrap();
        let resources = pod.containers[0].resources.clone().unwrap();
        let requests = resources.requests.unwrap();
        assert_eq!(requests["cpu"], Quantity("250m".to_string()));
        assert_eq!(requests["memory"], Quantity("64Mi".to_string()));
        let limits = resources.limits.unwrap();
        assert_eq!(limits.get("cpu"), None);
        assert_eq!(limits["memory"], Quantity("256Mi".to_string()));
    }

    #[test]
    fn test_env_is_sorted_and_carries_identity() {
        let mut defaults = resolved_defaults();
        defaults.env = BTreeMap::from([
            ("LOG_LEVEL".to_string(), "info".to_string()),
            ("ZONE".to_string(), "a".to_string()),
        ]);
        let mut spec = minimal_spec("host-1");
        spec.overrides = Some(HostOverrides {
            env: BTreeMap::from([
                ("LOG_LEVEL".to_string(), "debug".to_string()),
                ("HOST_ID".to_string(), "spoofed".to_string()),
            ]),
            ..Default::default()
        });

        let rendered = render(&create_test_host("h1", spec), &defaults).unwrap();
        assert_eq!(
            env_of(&rendered),
            vec![
                ("HOST_ID".to_string(), "host-1".to_string()),
                ("HOST_NAME".to_string(), "h1".to_string()),
                ("LOG_LEVEL".to_string(), "debug".to_string()),
                ("ZONE".to_string(), "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_generated_objects_carry_owner_and_labels() {
        let host = create_test_host("h1", minimal_spec("host-1"));
        let rendered = render(&host, &resolved_defaults()).unwrap();

        for object in rendered.objects() {
            assert!(object.is_owned_by("h1-uid"), "{} must be owned by the Host", object.key());
            let owner = &object.meta().owner_references.as_ref().unwrap()[0];
            assert_eq!(owner.kind, "Host");
            assert_eq!(owner.controller, Some(true));

            let labels = object.meta().labels.clone().unwrap();
            assert_eq!(labels["app.kubernetes.io/name"], "host-manager");
            assert_eq!(labels["app.kubernetes.io/instance"], "h1");
            assert_eq!(labels["app.kubernetes.io/managed-by"], "nexus-manager");
            assert_eq!(labels["nexus.io/host-id"], "host-1");
        }
    }

    #[test]
    fn test_override_labels_cannot_replace_operator_labels() {
        let mut spec = minimal_spec("host-1");
        spec.overrides = Some(HostOverrides {
            labels: BTreeMap::from([
                ("team".to_string(), "infra".to_string()),
                ("app.kubernetes.io/managed-by".to_string(), "helm".to_string()),
            ]),
            ..Default::default()
        });
        let rendered = render(&create_test_host("h1", spec), &resolved_defaults()).unwrap();
        let labels = rendered.deployment.metadata.labels.unwrap();
        assert_eq!(labels["team"], "infra");
        assert_eq!(labels["app.kubernetes.io/managed-by"], "nexus-manager");
    }

    #[test]
    fn test_rendering_is_byte_stable() {
        let mut spec = minimal_spec("host-1");
        spec.overrides = Some(HostOverrides {
            env: BTreeMap::from([
                ("B".to_string(), "2".to_string()),
                ("A".to_string(), "1".to_string()),
            ]),
            annotations: BTreeMap::from([("x".to_string(), "y".to_string())]),
            node_selector: BTreeMap::from([("disk".to_string(), "ssd".to_string())]),
            ..Default::default()
        });
        let host = create_test_host("h1", spec);

        let first = render(&host, &resolved_defaults()).unwrap();
        let second = render(&host, &resolved_defaults()).unwrap();
        assert_eq!(first, second);
        for (a, b) in first.objects().iter().zip(second.objects().iter()) {
            assert_eq!(
                serde_json::to_string(&a.to_value().unwrap()).unwrap(),
                serde_json::to_string(&b.to_value().unwrap()).unwrap()
            );
        }
    }

    #[test]
    fn test_rendered_hash_tracks_removed_fields() {
        let hash_of = |rendered: &RenderedHost| {
            rendered.deployment.metadata.annotations.as_ref().unwrap()["nexus.io/rendered-hash"].clone()
        };
        let mut spec = minimal_spec("host-1");
        spec.overrides = Some(HostOverrides {
            node_selector: BTreeMap::from([("disk".to_string(), "ssd".to_string())]),
            ..Default::default()
        });
        let with_selector = render(&create_test_host("h1", spec), &resolved_defaults()).unwrap();
        let without = render(&create_test_host("h1", minimal_spec("host-1")), &resolved_defaults()).unwrap();

        assert_eq!(hash_of(&with_selector).len(), 32);
        assert_ne!(hash_of(&with_selector), hash_of(&without));
        let service_annotations = without.service.unwrap().metadata.annotations.unwrap();
        assert!(service_annotations.contains_key("nexus.io/rendered-hash"));
    }

    #[test]
    fn test_empty_env_value_is_rendered_absent() {
        let mut spec = minimal_spec("host-1");
        spec.overrides = Some(HostOverrides {
            env: BTreeMap::from([("EMPTY".to_string(), String::new())]),
            ..Default::default()
        });
        let rendered = render(&create_test_host("h1", spec), &resolved_defaults()).unwrap();
        let pod = rendered.deployment.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.clone().unwrap();
        let empty = env.iter().find(|e| e.name == "EMPTY").unwrap();
        assert_eq!(empty.value, None);

        let value = serde_json::to_value(empty).unwrap();
        assert!(value.get("value").is_none());
    }

    #[test]
    fn test_missing_image_is_invalid_spec() {
        let mut defaults = resolved_defaults();
        defaults.image = None;
        let err = render(&create_test_host("h1", minimal_spec("host-1")), &defaults).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSpec(ref m) if m.contains("spec.image")));
    }

    #[test]
    fn test_structural_errors_are_invalid_spec() {
        let defaults = resolved_defaults();

        let err = render(&create_test_host("h1", minimal_spec("")), &defaults).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSpec(ref m) if m.contains("spec.hostId")));

        let mut spec = minimal_spec("host-1");
        spec.replicas = Some(-1);
        let err = render(&create_test_host("h1", spec), &defaults).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSpec(ref m) if m.contains("spec.replicas")));

        let mut host = create_test_host("h1", minimal_spec("host-1"));
        host.metadata.uid = None;
        assert!(matches!(render(&host, &defaults), Err(ControllerError::InvalidSpec(_))));
    }
}
