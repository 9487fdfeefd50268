//! `AISecurityAnomaly` Custom Resource Definition
//!
//! Anomalies are raised by external detectors. The controller only records when
//! it first saw them; investigation state is edited by people or other tooling.

use super::condition::RequestCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(group = "ai.example.com", version = "v1alpha1", kind = "AISecurityAnomaly")]
#[kube(namespaced, plural = "aisecurityanomalies", shortname = "asa")]
#[kube(status = "AISecurityAnomalyStatus")]
#[kube(printcolumn = r#"{"name":"Severity","type":"string","jsonPath":".spec.severity"}"#)]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.anomalyType"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct AISecurityAnomalySpec {
    pub description: String,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AISecurityAnomalyStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub first_observed_at: Option<String>,
    #[serde(default)]
    pub last_observed_at: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub resolution_details: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<RequestCondition>,
}

/// Investigation state of an anomaly
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum AnomalyState {
    /// Recorded but nobody has looked at it yet
    New,
    Investigating,
    Mitigating,
    Resolved,
    /// Investigation showed nothing was wrong
    FalsePositive,
}

impl AnomalyState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyState::New => "New",
            AnomalyState::Investigating => "Investigating",
            AnomalyState::Mitigating => "Mitigating",
            AnomalyState::Resolved => "Resolved",
            AnomalyState::FalsePositive => "FalsePositive",
        }
    }

    /// Parse a state as written by external actors; unknown values yield `None`
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(AnomalyState::New),
            "investigating" => Some(AnomalyState::Investigating),
            "mitigating" => Some(AnomalyState::Mitigating),
            "resolved" => Some(AnomalyState::Resolved),
            "falsepositive" | "false-positive" | "false_positive" => {
                Some(AnomalyState::FalsePositive)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_open(self) -> bool {
        !matches!(self, AnomalyState::Resolved | AnomalyState::FalsePositive)
    }
}

impl fmt::Display for AnomalyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AISecurityAnomaly {
    /// Whether the anomaly still needs attention. Missing or unrecognized states count as open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.state.as_deref())
            .and_then(AnomalyState::parse)
            .map_or(true, AnomalyState::is_open)
    }
}
