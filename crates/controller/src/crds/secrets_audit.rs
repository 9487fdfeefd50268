//! `AISecretsAudit` Custom Resource Definition

use super::condition::RequestCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[kube(group = "ai.example.com", version = "v1alpha1", kind = "AISecretsAudit")]
#[kube(namespaced, plural = "aisecretsaudits", shortname = "asaud")]
#[kube(status = "AISecretsAuditStatus")]
#[kube(printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.namespace"}"#)]
#[kube(printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.auditResult"}"#)]
#[kube(printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.error"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct AISecretsAuditSpec {
    /// Namespace whose secrets are audited; all namespaces when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Also audit secrets synced by external secret operators
    #[serde(default)]
    pub include_external_secrets: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_type: Option<String>,
    /// Lowest severity to report (Critical, High, Medium, Low, Informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_threshold: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AISecretsAuditStatus {
    #[serde(default)]
    pub audit_result: Option<String>,
    #[serde(default)]
    pub potentially_leaked_secrets: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub last_audit_time: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<RequestCondition>,
}
