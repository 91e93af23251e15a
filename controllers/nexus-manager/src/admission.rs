//! Admission defaulting and validation for Host objects
//!
//! Stateless: both functions only look at the incoming Host and the defaults
//! snapshot, never at other cluster objects.

use std::fmt;
use std::sync::LazyLock;

use crds::labels::{APP_INSTANCE, APP_NAME, HOST_ID, MANAGED_BY};
use crds::{Host, HostResources, ResourceAmounts};
use regex::Regex;

use crate::defaults::ResolvedDefaults;
use crate::renderer::RESERVED_ENV;

/// Longest Host name whose generated names stay within 63 characters
pub const MAX_HOST_NAME_LEN: usize = 47;

const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

// [registry[:port]/]path[/path...][:tag][@sha256:digest]
static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?/)?",
        r"[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*",
        r"(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*",
        r"(?::[\w][\w.-]{0,127})?",
        r"(?:@sha256:[a-f0-9]{64})?$",
    ))
    .unwrap_or_else(|e| unreachable!("image reference pattern: {e}"))
});

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]{0,61}[A-Za-z0-9])?$")
        .unwrap_or_else(|e| unreachable!("label value pattern: {e}"))
});

static ENV_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|e| unreachable!("env name pattern: {e}"))
});

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+|m|k|M|G|T|P|E|Ki|Mi|Gi|Ti|Pi|Ei)?$")
        .unwrap_or_else(|e| unreachable!("quantity pattern: {e}"))
});

/// One structured rejection: the offending field and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub reason: String,
}

impl FieldError {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Single message listing every rejection, for the admission response.
pub fn denial_message(errors: &[FieldError]) -> String {
    let fields: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("Host rejected: {}", fields.join("; "))
}

/// Copy every unset optional field from `defaults`. Applying it twice is the
/// same as applying it once.
pub fn default_host(host: &Host, defaults: &ResolvedDefaults) -> Host {
    let mut host = host.clone();
    let spec = &mut host.spec;

    if spec.image.is_none() {
        spec.image = defaults.image.clone();
    }
    spec.replicas.get_or_insert(defaults.replicas);
    spec.port.get_or_insert(defaults.port);
    spec.expose.get_or_insert(defaults.expose);

    let resources = spec
        .resources
        .clone()
        .unwrap_or_default()
        .merged_over(defaults.resources.as_ref());
    if resources != HostResources::default() {
        spec.resources = Some(resources);
    }

    if let Some(policy) = &defaults.image_pull_policy {
        let overrides = spec.overrides.get_or_insert_with(Default::default);
        overrides.image_pull_policy.get_or_insert_with(|| policy.clone());
    }

    if spec.defaults_ref.is_none() {
        spec.defaults_ref = defaults.source.clone();
    }
    host
}

/// Check the structural rules a Host must satisfy before it is persisted.
pub fn validate_host(host: &Host) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    let spec = &host.spec;

    if let Some(name) = &host.metadata.name {
        if name.len() > MAX_HOST_NAME_LEN {
            errors.push(FieldError::new(
                "metadata.name",
                format!("must be at most {MAX_HOST_NAME_LEN} characters"),
            ));
        }
    }

    if spec.host_id.trim().is_empty() {
        errors.push(FieldError::new("spec.hostId", "must not be empty"));
    } else if !LABEL_VALUE.is_match(&spec.host_id) {
        errors.push(FieldError::new(
            "spec.hostId",
            "must be at most 63 alphanumeric characters, '-', '_' or '.', starting and ending alphanumeric",
        ));
    }

    match spec.image.as_deref() {
        None => errors.push(FieldError::new("spec.image", "required (no default image is configured)")),
        Some(image) if !IMAGE_REF.is_match(image) => {
            errors.push(FieldError::new("spec.image", format!("malformed image reference {image:?}")));
        }
        Some(_) => {}
    }

    if let Some(replicas) = spec.replicas {
        if replicas < 0 {
            errors.push(FieldError::new("spec.replicas", "must not be negative"));
        }
    }

    if let Some(port) = spec.port {
        if !(1..=65535).contains(&port) {
            errors.push(FieldError::new("spec.port", "must be between 1 and 65535"));
        }
    }

    if let Some(resources) = &spec.resources {
        validate_amounts("spec.resources.requests", resources.requests.as_ref(), &mut errors);
        validate_amounts("spec.resources.limits", resources.limits.as_ref(), &mut errors);
    }

    if let Some(overrides) = &spec.overrides {
        for key in overrides.env.keys() {
            let path = format!("spec.overrides.env.{key}");
            if !ENV_NAME.is_match(key) {
                errors.push(FieldError::new(path, "not a valid environment variable name"));
            } else if RESERVED_ENV.contains(&key.as_str()) {
                errors.push(FieldError::new(path, "reserved, set by the operator"));
            }
        }
        for key in overrides.labels.keys() {
            if [APP_NAME, APP_INSTANCE, MANAGED_BY, HOST_ID].contains(&key.as_str()) {
                errors.push(FieldError::new(
                    format!("spec.overrides.labels.{key}"),
                    "reserved, set by the operator",
                ));
            }
        }
        if let Some(policy) = &overrides.image_pull_policy {
            if !PULL_POLICIES.contains(&policy.as_str()) {
                errors.push(FieldError::new(
                    "spec.overrides.imagePullPolicy",
                    format!("must be one of {}", PULL_POLICIES.join(", ")),
                ));
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_amounts(path: &str, amounts: Option<&ResourceAmounts>, errors: &mut Vec<FieldError>) {
    let Some(amounts) = amounts else { return };
    for (name, value) in [("cpu", &amounts.cpu), ("memory", &amounts.memory)] {
        if let Some(value) = value {
            if !QUANTITY.is_match(value) {
                errors.push(FieldError::new(format!("{path}.{name}"), format!("malformed quantity {value:?}")));
            }
        }
    }
}

/// Defaulting followed by validation, as done for the mutating endpoint.
pub fn admit(host: &Host, defaults: &ResolvedDefaults) -> Result<Host, Vec<FieldError>> {
    let defaulted = default_host(host, defaults);
    validate_host(&defaulted)?;
    Ok(defaulted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::HostOverrides;
    use std::collections::BTreeMap;

    #[test]
    fn test_defaulting_fills_unset_fields() {
        let host = create_test_host("h1", minimal_spec("host-1"));
        let defaulted = default_host(&host, &resolved_defaults());

        assert_eq!(defaulted.spec.image.as_deref(), Some("host-manager:stable"));
        assert_eq!(defaulted.spec.replicas, Some(1));
        assert_eq!(defaulted.spec.port, Some(8080));
        assert_eq!(defaulted.spec.expose, Some(true));
    }

    #[test]
    fn test_defaulting_keeps_set_fields() {
        let mut spec = minimal_spec("host-1");
        spec.image = Some("host-manager:v2".to_string());
        spec.replicas = Some(0);
        let defaulted = default_host(&create_test_host("h1", spec), &resolved_defaults());

        assert_eq!(defaulted.spec.image.as_deref(), Some("host-manager:v2"));
        assert_eq!(defaulted.spec.replicas, Some(0));
    }

    #[test]
    fn test_defaulting_is_idempotent() {
        let mut defaults = resolved_defaults();
        defaults.source = Some("default".to_string());
        defaults.image_pull_policy = Some("IfNotPresent".to_string());
        defaults.resources = Some(HostResources {
            requests: Some(ResourceAmounts {
                cpu: Some("100m".to_string()),
                memory: None,
            }),
            limits: None,
        });
        let host = create_test_host("h1", minimal_spec("host-1"));

        let once = default_host(&host, &defaults);
        let twice = default_host(&once, &defaults);
        assert_eq!(once, twice);
        assert_eq!(once.spec.defaults_ref.as_deref(), Some("default"));
    }

    #[test]
    fn test_valid_host_passes() {
        let host = admit(&create_test_host("h1", minimal_spec("host-1")), &resolved_defaults());
        assert!(host.is_ok());
    }

    #[test]
    fn test_image_references() {
        for good in [
            "host-manager:stable",
            "registry.example.com:5000/nexus/host-manager:v1.2.3",
            "ghcr.io/nexus-io/host-manager",
            "host-manager@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        ] {
            assert!(IMAGE_REF.is_match(good), "{good} should be accepted");
        }
        for bad in ["", "Host-Manager:stable", "host-manager:", "host manager", "host-manager:tag:extra"] {
            assert!(!IMAGE_REF.is_match(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_rejections_name_the_field() {
        let mut spec = minimal_spec("");
        spec.image = Some("not a ref".to_string());
        spec.replicas = Some(-2);
        let errors = validate_host(&create_test_host("h1", spec)).unwrap_err();

        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["spec.hostId", "spec.image", "spec.replicas"]);
        let message = denial_message(&errors);
        assert!(message.contains("spec.replicas: must not be negative"));
    }

    #[test]
    fn test_missing_image_without_default_is_rejected() {
        let mut defaults = resolved_defaults();
        defaults.image = None;
        let errors = admit(&create_test_host("h1", minimal_spec("host-1")), &defaults).unwrap_err();
        assert_eq!(errors[0].path, "spec.image");
    }

    #[test]
    fn test_long_names_are_rejected() {
        let name = "h".repeat(MAX_HOST_NAME_LEN + 1);
        let errors = admit(&create_test_host(&name, minimal_spec("host-1")), &resolved_defaults()).unwrap_err();
        assert_eq!(errors[0].path, "metadata.name");
    }

    #[test]
    fn test_reserved_overrides_are_rejected() {
        let mut spec = minimal_spec("host-1");
        spec.overrides = Some(HostOverrides {
            env: BTreeMap::from([("HOST_ID".to_string(), "x".to_string())]),
            labels: BTreeMap::from([(MANAGED_BY.to_string(), "helm".to_string())]),
            image_pull_policy: Some("Sometimes".to_string()),
            ..Default::default()
        });
        let errors = admit(&create_test_host("h1", spec), &resolved_defaults()).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_malformed_quantities_are_rejected() {
        let mut spec = minimal_spec("host-1");
        spec.resources = Some(HostResources {
            requests: Some(ResourceAmounts {
                cpu: Some("250m".to_string()),
                memory: Some("lots".to_string()),
            }),
            limits: None,
        });
        let errors = admit(&create_test_host("h1", spec), &resolved_defaults()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "spec.resources.requests.memory");
    }
}
