//! Condition records attached to `HostStatus`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type: the generated workload set matches the rendered state
pub const READY: &str = "Ready";
/// Condition type: the operator is still working towards convergence
pub const PROGRESSING: &str = "Progressing";

/// Well-known condition reasons.
pub mod reasons {
    /// Every generated object matches the rendered state
    pub const RECONCILED: &str = "Reconciled";
    /// Nothing left to apply
    pub const CONVERGED: &str = "Converged";
    /// Writes were issued in this pass
    pub const APPLYING: &str = "Applying";
    /// Another writer raced ahead; a fresh pass follows
    pub const CONFLICT: &str = "Conflict";
    /// The object store could not be reached
    pub const UNAVAILABLE: &str = "Unavailable";
    /// A generated name is taken by an object this Host does not own
    pub const NAME_CONFLICT: &str = "NameConflict";
    /// The spec cannot be rendered until it is edited
    pub const INVALID_SPEC: &str = "InvalidSpec";
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// One timestamped condition record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostCondition {
    /// Condition type (`Ready`, `Progressing`)
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Machine-readable CamelCase reason
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// Last time `status` changed
    pub last_transition_time: DateTime<Utc>,
}

impl HostCondition {
    /// Builds a condition stamped with `now`.
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: now,
        }
    }
}

/// Merges `next` into `existing` keeping `lastTransitionTime` of every
/// condition whose status did not change. Result is ordered by type.
pub fn merge_conditions(existing: &[HostCondition], next: Vec<HostCondition>) -> Vec<HostCondition> {
    let mut merged: Vec<HostCondition> = next
        .into_iter()
        .map(|mut condition| {
            if let Some(previous) = existing.iter().find(|c| c.type_ == condition.type_) {
                if previous.status == condition.status {
                    condition.last_transition_time = previous.last_transition_time;
                }
            }
            condition
        })
        .collect();
    merged.sort_by(|a, b| a.type_.cmp(&b.type_));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let existing = vec![HostCondition::new(READY, ConditionStatus::True, reasons::RECONCILED, "ok", at(10))];
        let next = vec![HostCondition::new(READY, ConditionStatus::True, reasons::RECONCILED, "still ok", at(20))];

        let merged = merge_conditions(&existing, next);
        assert_eq!(merged[0].last_transition_time, at(10));
        assert_eq!(merged[0].message, "still ok");
    }

    #[test]
    fn test_transition_time_moves_when_status_flips() {
        let existing = vec![HostCondition::new(READY, ConditionStatus::True, reasons::RECONCILED, "", at(10))];
        let next = vec![HostCondition::new(READY, ConditionStatus::False, reasons::UNAVAILABLE, "", at(20))];

        let merged = merge_conditions(&existing, next);
        assert_eq!(merged[0].last_transition_time, at(20));
    }

    #[test]
    fn test_merged_conditions_sorted_by_type() {
        let next = vec![
            HostCondition::new(READY, ConditionStatus::True, reasons::RECONCILED, "", at(1)),
            HostCondition::new(PROGRESSING, ConditionStatus::False, reasons::CONVERGED, "", at(1)),
        ];
        let merged = merge_conditions(&[], next);
        assert_eq!(merged[0].type_, PROGRESSING);
        assert_eq!(merged[1].type_, READY);
    }
}
