//! `AINetworkPolicyAudit` Custom Resource Definition

use super::condition::RequestCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[kube(group = "ai.example.com", version = "v1alpha1", kind = "AINetworkPolicyAudit")]
#[kube(namespaced, plural = "ainetworkpolicyaudits", shortname = "anpa")]
#[kube(status = "AINetworkPolicyAuditStatus")]
#[kube(printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.namespace"}"#)]
#[kube(printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.auditResult"}"#)]
#[kube(printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.error"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct AINetworkPolicyAuditSpec {
    /// Namespace whose policies are audited; all namespaces when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Check the policies against the built-in baseline checklist
    #[serde(default)]
    pub include_baseline_policies: bool,
    /// Free-form audit rules appended to the analysis request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_audit_rules: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AINetworkPolicyAuditStatus {
    #[serde(default)]
    pub audit_result: Option<String>,
    #[serde(default)]
    pub non_compliant_policies: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub last_audit_time: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<RequestCondition>,
}
