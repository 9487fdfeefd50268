//! Status conditions shared by every analysis request kind

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type that summarizes whether the current spec has been analyzed
pub const READY_CONDITION: &str = "Ready";

/// Reasons attached to the `Ready` condition
pub mod reasons {
    pub const ANALYSIS_SUCCEEDED: &str = "AnalysisSucceeded";
    pub const ANALYSIS_FAILED: &str = "AnalysisFailed";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const OBSERVED: &str = "Observed";
}

/// Status value of a condition
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition for analysis requests
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition's last transition
    pub reason: String,

    /// Human-readable message about the condition
    #[serde(default)]
    pub message: String,

    /// Last time the condition's status changed (RFC3339 format)
    pub last_transition_time: String,

    /// Generation the condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl RequestCondition {
    #[must_use]
    pub fn new(
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: rfc3339(now),
            observed_generation: None,
        }
    }

    #[must_use]
    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Format a timestamp the way the API server does (second precision, `Z` suffix)
#[must_use]
pub fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Latest condition of the given type
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [RequestCondition],
    condition_type: &str,
) -> Option<&'a RequestCondition> {
    conditions
        .iter()
        .rev()
        .find(|c| c.condition_type == condition_type)
}

/// Insert or replace the condition of the same type.
///
/// The existing transition time is kept when the status value does not change,
/// and any duplicate entries of that type are dropped.
pub fn upsert_condition(conditions: &mut Vec<RequestCondition>, mut condition: RequestCondition) {
    let existing = conditions
        .iter()
        .position(|c| c.condition_type == condition.condition_type);

    match existing {
        Some(index) => {
            if let Some(previous) = find_condition(conditions, &condition.condition_type) {
                if previous.status == condition.status {
                    condition
                        .last_transition_time
                        .clone_from(&previous.last_transition_time);
                }
            }
            let condition_type = condition.condition_type.clone();
            conditions[index] = condition;
            let mut seen = false;
            conditions.retain(|c| {
                if c.condition_type != condition_type {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
        }
        None => conditions.push(condition),
    }
}

/// Collapse duplicate condition types, last write wins, first position kept
#[must_use]
pub fn dedupe_conditions(conditions: &[RequestCondition]) -> Vec<RequestCondition> {
    let mut deduped: Vec<RequestCondition> = Vec::with_capacity(conditions.len());
    for condition in conditions {
        match deduped
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(slot) => *slot = condition.clone(),
            None => deduped.push(condition.clone()),
        }
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn ready(status: ConditionStatus, reason: &str, hour: u32) -> RequestCondition {
        RequestCondition::new(READY_CONDITION, status, reason, "", at(hour))
    }

    #[test]
    fn test_rfc3339_uses_second_precision_and_zulu() {
        assert_eq!(rfc3339(at(7)), "2025-03-01T07:00:00Z");
    }

    #[test]
    fn test_upsert_appends_new_type() {
        let mut conditions = vec![];
        upsert_condition(
            &mut conditions,
            ready(ConditionStatus::True, reasons::ANALYSIS_SUCCEEDED, 1),
        );
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].is_true());
    }

    #[test]
    fn test_upsert_keeps_transition_time_when_status_unchanged() {
        let mut conditions = vec![ready(ConditionStatus::False, reasons::ANALYSIS_FAILED, 1)];
        let mut next = ready(ConditionStatus::False, reasons::ANALYSIS_FAILED, 5);
        next.message = "still failing".to_string();
        upsert_condition(&mut conditions, next);

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, rfc3339(at(1)));
        assert_eq!(conditions[0].message, "still failing");
    }

    #[test]
    fn test_upsert_moves_transition_time_when_status_flips() {
        let mut conditions = vec![ready(ConditionStatus::False, reasons::ANALYSIS_FAILED, 1)];
        upsert_condition(
            &mut conditions,
            ready(ConditionStatus::True, reasons::ANALYSIS_SUCCEEDED, 5),
        );
        assert_eq!(conditions[0].last_transition_time, rfc3339(at(5)));
        assert_eq!(conditions[0].reason, reasons::ANALYSIS_SUCCEEDED);
    }

    #[test]
    fn test_upsert_drops_duplicates_of_the_same_type() {
        let other = RequestCondition::new("Degraded", ConditionStatus::False, "Fine", "", at(0));
        let mut conditions = vec![
            ready(ConditionStatus::False, reasons::ANALYSIS_FAILED, 1),
            other.clone(),
            ready(ConditionStatus::False, reasons::ANALYSIS_FAILED, 2),
        ];
        upsert_condition(
            &mut conditions,
            ready(ConditionStatus::True, reasons::ANALYSIS_SUCCEEDED, 3),
        );

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].condition_type, READY_CONDITION);
        assert_eq!(conditions[1], other);
    }

    #[test]
    fn test_dedupe_is_last_write_wins() {
        let conditions = vec![
            ready(ConditionStatus::False, reasons::ANALYSIS_FAILED, 1),
            ready(ConditionStatus::True, reasons::ANALYSIS_SUCCEEDED, 2),
        ];
        let deduped = dedupe_conditions(&conditions);
        assert_eq!(deduped.len(), 1);
        assert!(deduped[0].is_true());
    }

    #[test]
    fn test_condition_wire_shape() {
        let condition = ready(ConditionStatus::True, reasons::ANALYSIS_SUCCEEDED, 4)
            .with_observed_generation(3);
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["type"], "Ready");
        assert_eq!(value["status"], "True");
        assert_eq!(value["lastTransitionTime"], "2025-03-01T04:00:00Z");
        assert_eq!(value["observedGeneration"], 3);
    }
}
