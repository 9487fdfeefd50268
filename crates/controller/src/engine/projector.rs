//! Status projection
//!
//! `project` computes the next status from the previous one and the outcome of an
//! attempt. It performs no I/O and takes the current time as an argument.

use chrono::{DateTime, Utc};

use crate::analyzers::Findings;
use crate::crds::condition::{
    dedupe_conditions, find_condition, reasons, rfc3339, upsert_condition, ConditionStatus,
    RequestCondition, READY_CONDITION,
};

/// Kind-independent view of an analysis request's status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisStatus {
    pub result: Option<String>,
    pub findings: Vec<String>,
    pub suggestions: Vec<String>,
    pub error: Option<String>,
    pub last_processed_at: Option<String>,
    pub observed_generation: Option<i64>,
    pub conditions: Vec<RequestCondition>,
}

impl AnalysisStatus {
    #[must_use]
    pub fn ready_condition(&self) -> Option<&RequestCondition> {
        find_condition(&self.conditions, READY_CONDITION)
    }

    /// Whether this status already answers the given generation.
    ///
    /// True after a success, and after an invalid-spec rejection, which only a
    /// spec edit can change.
    #[must_use]
    pub fn is_settled_for(&self, generation: i64) -> bool {
        if self.observed_generation != Some(generation) {
            return false;
        }
        self.ready_condition().is_some_and(|ready| {
            ready.is_true()
                || (ready.status == ConditionStatus::False && ready.reason == reasons::INVALID_SPEC)
        })
    }
}

/// Outcome of one reconciliation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// Analyzer returned findings
    Succeeded(Findings),
    /// Analyzer failed or timed out; retryable
    Failed(String),
    /// The spec cannot be analyzed until it changes
    Rejected(String),
}

/// Compute the next status for an attempt made against `generation`
#[must_use]
pub fn project(
    previous: &AnalysisStatus,
    attempt: &AttemptResult,
    generation: i64,
    now: DateTime<Utc>,
) -> AnalysisStatus {
    let mut next = previous.clone();
    next.conditions = dedupe_conditions(&previous.conditions);

    let ready = match attempt {
        AttemptResult::Succeeded(findings) => {
            next.result = Some(findings.summary.clone());
            next.findings.clone_from(&findings.findings);
            next.suggestions.clone_from(&findings.suggestions);
            next.error = None;
            next.last_processed_at = Some(rfc3339(now));
            next.observed_generation = Some(generation);
            RequestCondition::new(
                READY_CONDITION,
                ConditionStatus::True,
                reasons::ANALYSIS_SUCCEEDED,
                "Analysis completed",
                now,
            )
            .with_observed_generation(generation)
        }
        AttemptResult::Failed(message) => {
            next.error = Some(message.clone());
            RequestCondition::new(
                READY_CONDITION,
                ConditionStatus::False,
                reasons::ANALYSIS_FAILED,
                message.clone(),
                now,
            )
            .with_observed_generation(generation)
        }
        AttemptResult::Rejected(message) => {
            next.error = Some(message.clone());
            next.observed_generation = Some(generation);
            RequestCondition::new(
                READY_CONDITION,
                ConditionStatus::False,
                reasons::INVALID_SPEC,
                message.clone(),
                now,
            )
            .with_observed_generation(generation)
        }
    };

    upsert_condition(&mut next.conditions, ready);
    next
}
