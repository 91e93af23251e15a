//! Event/Status reporter
//!
//! Turns the outcome of a reconciliation pass into `HostStatus` conditions
//! and cluster events. Status is only written when it changed, so a pass
//! with nothing to do writes nothing.

use chrono::{DateTime, Utc};
use cluster_client::{ClusterClientTrait, ClusterError, EventSeverity, HostEvent, ObjectKind};
use crds::condition::{PROGRESSING, READY, reasons};
use crds::{ConditionStatus, Host, HostCondition, HostStatus, merge_conditions};
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::error::{ControllerError, ErrorKind};

/// Kind of write issued against a generated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

impl WriteOp {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            WriteOp::Create => "create",
            WriteOp::Update => "update",
            WriteOp::Delete => "delete",
        }
    }

    fn event_reason(self) -> &'static str {
        match self {
            WriteOp::Create => "Created",
            WriteOp::Update => "Updated",
            WriteOp::Delete => "Deleted",
        }
    }
}

/// One write a pass made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedWrite {
    pub op: WriteOp,
    pub kind: ObjectKind,
    pub name: String,
    /// Diverging paths that caused an update
    pub paths: Vec<String>,
}

/// What a successful pass rendered and observed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PassReport {
    pub deployment_name: Option<String>,
    pub service_name: Option<String>,
    pub image: String,
    pub replicas: i32,
    pub available_replicas: Option<i32>,
    pub writes: Vec<AppliedWrite>,
}

fn failure_message(err: &ControllerError) -> String {
    match err {
        ControllerError::InvalidSpec(msg) => format!("InvalidSpec: {msg}"),
        ControllerError::NameConflict(msg) => format!("NameConflict: {msg}"),
        ControllerError::Conflict(_) => {
            "Conflict: a generated object was modified concurrently, retrying with a fresh pass".to_string()
        }
        _ => "Unavailable: the object store could not be reached, retrying with backoff".to_string(),
    }
}

fn failure_reason(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidSpec => reasons::INVALID_SPEC,
        ErrorKind::Conflict => reasons::CONFLICT,
        ErrorKind::NameConflict => reasons::NAME_CONFLICT,
        _ => reasons::UNAVAILABLE,
    }
}

/// Status reflecting `outcome`. On failure the rendered fields of the
/// previous status are carried over and only conditions change.
pub fn build_status(host: &Host, outcome: &Result<PassReport, ControllerError>, now: DateTime<Utc>) -> HostStatus {
    let previous = host.status.clone().unwrap_or_default();
    let mut status = previous.clone();
    status.observed_generation = host.metadata.generation;

    let conditions = match outcome {
        Ok(report) => {
            status.deployment_name = report.deployment_name.clone();
            status.service_name = report.service_name.clone();
            status.rendered_image = Some(report.image.clone());
            status.rendered_replicas = Some(report.replicas);
            status.available_replicas = report.available_replicas;

            let available = report.available_replicas.unwrap_or(0);
            let rollout = format!("{available}/{} replicas available", report.replicas);
            let progressing = if available >= report.replicas {
                HostCondition::new(PROGRESSING, ConditionStatus::False, reasons::CONVERGED, rollout, now)
            } else {
                HostCondition::new(
                    PROGRESSING,
                    ConditionStatus::True,
                    reasons::APPLYING,
                    format!("Waiting for rollout: {rollout}"),
                    now,
                )
            };
            vec![
                HostCondition::new(
                    READY,
                    ConditionStatus::True,
                    reasons::RECONCILED,
                    format!("Generated objects match image {}", report.image),
                    now,
                ),
                progressing,
            ]
        }
        Err(err) => {
            let reason = failure_reason(err.kind());
            let message = failure_message(err);
            // A spec that cannot render is not progressing; transient failures are
            let progressing = if err.kind() == ErrorKind::InvalidSpec {
                ConditionStatus::False
            } else {
                ConditionStatus::True
            };
            vec![
                HostCondition::new(READY, ConditionStatus::False, reason, message.clone(), now),
                HostCondition::new(PROGRESSING, progressing, reason, message, now),
            ]
        }
    };
    status.conditions = merge_conditions(&previous.conditions, conditions);
    status
}

/// Events for conditions whose status or reason changed.
pub fn transition_events(previous: Option<&HostStatus>, next: &HostStatus) -> Vec<HostEvent> {
    let Some(ready) = next.condition(READY) else {
        return Vec::new();
    };
    let before = previous.and_then(|p| p.condition(READY));
    if before.is_some_and(|b| b.status == ready.status && b.reason == ready.reason) {
        return Vec::new();
    }
    let severity = if ready.status == ConditionStatus::True {
        EventSeverity::Normal
    } else {
        EventSeverity::Warning
    };
    vec![HostEvent {
        severity,
        reason: ready.reason.clone(),
        action: "Reconcile".to_string(),
        note: ready.message.clone(),
    }]
}

/// One Normal event per write.
pub fn write_events(writes: &[AppliedWrite]) -> Vec<HostEvent> {
    writes
        .iter()
        .map(|write| HostEvent {
            severity: EventSeverity::Normal,
            reason: write.op.event_reason().to_string(),
            action: "Reconcile".to_string(),
            note: if write.paths.is_empty() {
                format!("{} {} {}", write.op.event_reason(), write.kind, write.name)
            } else {
                format!(
                    "{} {} {} ({})",
                    write.op.event_reason(),
                    write.kind,
                    write.name,
                    write.paths.join(", ")
                )
            },
        })
        .collect()
}

/// Writes the status for `outcome` when it changed and publishes events.
///
/// A Host deleted mid-pass has nothing left to report on; `NotFound` is
/// success. Event failures are logged and dropped.
pub async fn report(
    client: &dyn ClusterClientTrait,
    host: &Host,
    outcome: &Result<PassReport, ControllerError>,
    now: DateTime<Utc>,
) -> Result<(), ClusterError> {
    let namespace = host.namespace().unwrap_or_default();
    let name = host.name_any();
    let next = build_status(host, outcome, now);

    if host.status.as_ref() == Some(&next) {
        debug!(host = %name, namespace = %namespace, "Status unchanged");
    } else {
        match client.patch_host_status(&namespace, &name, &next).await {
            Ok(()) => debug!(host = %name, namespace = %namespace, "Status updated"),
            Err(ClusterError::NotFound(_)) => {
                debug!(host = %name, namespace = %namespace, "Host gone before status update");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }

    let mut events = match outcome {
        Ok(report) => write_events(&report.writes),
        Err(_) => Vec::new(),
    };
    events.extend(transition_events(host.status.as_ref(), &next));
    for event in events {
        if let Err(e) = client.publish_event(host, &event).await {
            warn!(host = %name, reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn report_with(available: Option<i32>) -> PassReport {
        PassReport {
            deployment_name: Some("h1-host-manager".to_string()),
            service_name: None,
            image: "host-manager:stable".to_string(),
            replicas: 1,
            available_replicas: available,
            writes: Vec::new(),
        }
    }

    #[test]
    fn test_success_sets_ready_and_rendered_fields() {
        let host = create_test_host("h1", minimal_spec("host-1"));
        let status = build_status(&host, &Ok(report_with(Some(1))), at(10));

        assert!(status.is_ready());
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.rendered_image.as_deref(), Some("host-manager:stable"));
        assert_eq!(status.condition(PROGRESSING).unwrap().reason, reasons::CONVERGED);
    }

    #[test]
    fn test_rollout_in_progress_is_progressing() {
        let host = create_test_host("h1", minimal_spec("host-1"));
        let status = build_status(&host, &Ok(report_with(None)), at(10));
        let progressing = status.condition(PROGRESSING).unwrap();
        assert_eq!(progressing.status, ConditionStatus::True);
        assert_eq!(progressing.reason, reasons::APPLYING);
    }

    #[test]
    fn test_unchanged_outcome_keeps_transition_time() {
        let mut host = create_test_host("h1", minimal_spec("host-1"));
        let first = build_status(&host, &Ok(report_with(Some(1))), at(10));
        host.status = Some(first.clone());

        let second = build_status(&host, &Ok(report_with(Some(1))), at(20));
        assert_eq!(first, second);
    }

    #[test]
    fn test_failure_keeps_rendered_fields_and_hides_transport_detail() {
        let mut host = create_test_host("h1", minimal_spec("host-1"));
        host.status = Some(build_status(&host, &Ok(report_with(Some(1))), at(10)));

        let err = ControllerError::Unavailable("dial tcp 10.0.0.1:443: connection refused".to_string());
        let status = build_status(&host, &Err(err), at(20));

        assert!(!status.is_ready());
        let ready = status.condition(READY).unwrap();
        assert_eq!(ready.reason, reasons::UNAVAILABLE);
        assert!(!ready.message.contains("10.0.0.1"));
        assert_eq!(ready.last_transition_time, at(20));
        assert_eq!(status.rendered_image.as_deref(), Some("host-manager:stable"));
        assert_eq!(status.condition(PROGRESSING).unwrap().status, ConditionStatus::True);
    }

    #[test]
    fn test_invalid_spec_is_not_progressing() {
        let host = create_test_host("h1", minimal_spec("host-1"));
        let err = ControllerError::InvalidSpec("spec.image: not set".to_string());
        let status = build_status(&host, &Err(err), at(10));

        let ready = status.condition(READY).unwrap();
        assert_eq!(ready.reason, reasons::INVALID_SPEC);
        assert!(ready.message.contains("spec.image"));
        assert_eq!(status.condition(PROGRESSING).unwrap().status, ConditionStatus::False);
    }

    #[test]
    fn test_events_only_on_ready_transitions() {
        let host = create_test_host("h1", minimal_spec("host-1"));
        let ready = build_status(&host, &Ok(report_with(Some(1))), at(10));

        let events = transition_events(None, &ready);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, EventSeverity::Normal);
        assert!(transition_events(Some(&ready), &ready).is_empty());

        let failed = build_status(&host, &Err(ControllerError::Conflict("x".to_string())), at(20));
        let events = transition_events(Some(&ready), &failed);
        assert_eq!(events[0].severity, EventSeverity::Warning);
        assert_eq!(events[0].reason, reasons::CONFLICT);
    }
}
