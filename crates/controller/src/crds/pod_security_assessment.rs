//! `AIPodSecurityAssessment` Custom Resource Definition

use super::condition::RequestCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[kube(group = "ai.example.com", version = "v1alpha1", kind = "AIPodSecurityAssessment")]
#[kube(namespaced, plural = "aipodsecurityassessments", shortname = "apsa")]
#[kube(status = "AIPodSecurityAssessmentStatus")]
#[kube(printcolumn = r#"{"name":"Pod","type":"string","jsonPath":".spec.podName"}"#)]
#[kube(printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.assessmentResult"}"#)]
#[kube(printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.error"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct AIPodSecurityAssessmentSpec {
    pub pod_name: String,
    pub namespace: String,
    /// Pod Security Standards profile to assess against (privileged, baseline, restricted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_profile: Option<String>,
    #[serde(default)]
    pub include_recommendations: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AIPodSecurityAssessmentStatus {
    #[serde(default)]
    pub assessment_result: Option<String>,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub last_assessment_time: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<RequestCondition>,
}
