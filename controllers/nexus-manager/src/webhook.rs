//! Admission webhook for Host objects
//!
//! `POST /mutate/hosts` defaults and validates in one call and answers with
//! an RFC 6902 patch; `POST /validate/hosts` only validates.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use crds::Host;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::admission::{FieldError, admit, denial_message, validate_host};
use crate::defaults::{DefaultsStore, ResolvedDefaults};

/// Shared state for webhook handlers
#[derive(Debug, Clone)]
pub struct WebhookState {
    pub defaults: Arc<DefaultsStore>,
}

/// Create the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate/hosts", post(mutate_handler))
        .route("/validate/hosts", post(validate_handler))
        .with_state(state)
}

/// Why an object could not be admitted.
#[derive(Debug)]
pub enum Rejection {
    /// The object is not a Host
    Malformed(String),
    /// The Host breaks one or more rules
    Invalid(Vec<FieldError>),
}

impl Rejection {
    fn message(&self) -> String {
        match self {
            Rejection::Malformed(msg) => format!("Host rejected: {msg}"),
            Rejection::Invalid(errors) => denial_message(errors),
        }
    }
}

fn parse_host(object: &DynamicObject) -> Result<(Value, Host), Rejection> {
    let value = serde_json::to_value(object).map_err(|e| Rejection::Malformed(e.to_string()))?;
    let host = serde_json::from_value(value.clone()).map_err(|e| Rejection::Malformed(e.to_string()))?;
    Ok((value, host))
}

/// JSON patch turning `object` into its defaulted form, or the reasons it
/// must be denied. Only `spec` is touched.
pub fn mutation_patch(object: &DynamicObject, defaults: &ResolvedDefaults) -> Result<json_patch::Patch, Rejection> {
    let (original, host) = parse_host(object)?;
    let admitted = admit(&host, defaults).map_err(Rejection::Invalid)?;

    let mut mutated = original.clone();
    let spec = serde_json::to_value(&admitted.spec).map_err(|e| Rejection::Malformed(e.to_string()))?;
    if let Value::Object(fields) = &mut mutated {
        fields.insert("spec".to_string(), spec);
    }
    Ok(json_patch::diff(&original, &mutated))
}

fn parse_review(body: AdmissionReview<DynamicObject>) -> Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    body.try_into().map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
        error!(error = %e, "Failed to parse admission request");
        AdmissionResponse::invalid(e.to_string())
    })
}

/// Handle mutating admission review for Hosts
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request = match parse_review(body) {
        Ok(request) => request,
        Err(response) => return Json(response.into_review()),
    };
    let response = AdmissionResponse::from(&request);

    // DELETE carries no object
    let Some(object) = &request.object else {
        return Json(response.into_review());
    };

    // Defaulting against the built-in values would persist them into the spec
    if !state.defaults.is_loaded() {
        warn!(uid = %request.uid, host = %request.name, "Cluster defaults not loaded, denying");
        return Json(response.deny("cluster defaults are not loaded yet, retry shortly").into_review());
    }
    let defaults = state.defaults.snapshot();
    let response = match mutation_patch(object, &defaults) {
        Ok(patch) => {
            info!(uid = %request.uid, host = %request.name, ops = patch.0.len(), "Defaulted Host");
            match response.with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(uid = %request.uid, error = %e, "Failed to serialize patch");
                    AdmissionResponse::from(&request).deny(format!("patch serialization error: {e}"))
                }
            }
        }
        Err(rejection) => {
            warn!(uid = %request.uid, host = %request.name, reason = %rejection.message(), "Denied Host");
            response.deny(rejection.message())
        }
    };
    Json(response.into_review())
}

/// Handle validating admission review for Hosts
pub async fn validate_handler(Json(body): Json<AdmissionReview<DynamicObject>>) -> Json<AdmissionReview<DynamicObject>> {
    let request = match parse_review(body) {
        Ok(request) => request,
        Err(response) => return Json(response.into_review()),
    };
    let response = AdmissionResponse::from(&request);
    let Some(object) = &request.object else {
        return Json(response.into_review());
    };

    let verdict = parse_host(object).and_then(|(_, host)| validate_host(&host).map_err(Rejection::Invalid));
    let response = match verdict {
        Ok(()) => {
            debug!(uid = %request.uid, host = %request.name, "Host is valid");
            response
        }
        Err(rejection) => {
            warn!(uid = %request.uid, host = %request.name, reason = %rejection.message(), "Denied Host");
            response.deny(rejection.message())
        }
    };
    Json(response.into_review())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn host_object(spec: Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "nexus.io/v1alpha1",
            "kind": "Host",
            "metadata": {"name": "h1", "namespace": "default"},
            "spec": spec,
        }))
        .unwrap()
    }

    fn review(spec: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "nexus.io", "version": "v1alpha1", "kind": "Host"},
                "resource": {"group": "nexus.io", "version": "v1alpha1", "resource": "hosts"},
                "name": "h1",
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "admin"},
                "object": {
                    "apiVersion": "nexus.io/v1alpha1",
                    "kind": "Host",
                    "metadata": {"name": "h1", "namespace": "default"},
                    "spec": spec,
                },
                "dryRun": false
            }
        })
    }

    async fn post(path: &str, body: Value) -> Value {
        post_with(create_test_defaults_store(), path, body).await
    }

    async fn post_with(defaults: Arc<DefaultsStore>, path: &str, body: Value) -> Value {
        let state = Arc::new(WebhookState { defaults });
        let response = webhook_router(state)
            .oneshot(
                Request::post(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_patch_adds_defaults_under_spec() {
        let patch = mutation_patch(&host_object(json!({"hostId": "host-1"})), &resolved_defaults()).unwrap();
        let mut doc = serde_json::to_value(host_object(json!({"hostId": "host-1"}))).unwrap();
        json_patch::patch(&mut doc, &patch.0).unwrap();

        assert_eq!(doc["spec"]["image"], "host-manager:stable");
        assert_eq!(doc["spec"]["replicas"], 1);
        assert_eq!(doc["metadata"]["name"], "h1");
    }

    #[test]
    fn test_patch_is_empty_for_defaulted_host() {
        let spec = json!({"hostId": "host-1", "image": "host-manager:stable", "replicas": 1, "port": 8080, "expose": true});
        let patch = mutation_patch(&host_object(spec), &resolved_defaults()).unwrap();
        assert!(patch.0.is_empty());
    }

    #[test]
    fn test_invalid_host_is_rejected_with_fields() {
        let result = mutation_patch(&host_object(json!({"hostId": "", "replicas": -1})), &resolved_defaults());
        let Err(Rejection::Invalid(errors)) = result else {
            panic!("expected field errors");
        };
        assert!(errors.iter().any(|e| e.path == "spec.hostId"));
        assert!(errors.iter().any(|e| e.path == "spec.replicas"));
    }

    #[tokio::test]
    async fn test_mutate_endpoint_allows_with_patch() {
        let body = post("/mutate/hosts", review(json!({"hostId": "host-1"}))).await;
        assert_eq!(body["response"]["allowed"], true);
        assert_eq!(body["response"]["patchType"], "JSONPatch");
        assert_eq!(body["response"]["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
    }

    #[tokio::test]
    async fn test_mutate_endpoint_denies_until_defaults_load() {
        let defaults = Arc::new(DefaultsStore::new(builtin_defaults(), "default"));
        let body = post_with(Arc::clone(&defaults), "/mutate/hosts", review(json!({"hostId": "host-1"}))).await;
        assert_eq!(body["response"]["allowed"], false);
        assert!(body["response"]["patch"].is_null());

        defaults.replace(None);
        let body = post_with(defaults, "/mutate/hosts", review(json!({"hostId": "host-1"}))).await;
        assert_eq!(body["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_validate_endpoint_denies_malformed_image() {
        let body = post(
            "/validate/hosts",
            review(json!({"hostId": "host-1", "image": "Not An Image"})),
        )
        .await;
        assert_eq!(body["response"]["allowed"], false);
        let message = body["response"]["status"]["message"].as_str().unwrap();
        assert!(message.contains("spec.image"), "{message}");
    }
}
