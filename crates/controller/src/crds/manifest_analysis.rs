//! `AIManifestAnalysis` Custom Resource Definition for manifest review

use super::condition::RequestCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(group = "ai.example.com", version = "v1alpha1", kind = "AIManifestAnalysis")]
#[kube(namespaced, plural = "aimanifestanalyses", shortname = "ama")]
#[kube(status = "AIManifestAnalysisStatus")]
#[kube(printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.analysisResult"}"#)]
#[kube(printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.error"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct AIManifestAnalysisSpec {
    /// Raw manifest content (YAML or JSON, may hold several documents)
    pub manifest: String,
    /// Optional: named LLM provider to use instead of the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    /// Optional: focus of the analysis (e.g. "security", "best-practices")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AIManifestAnalysisStatus {
    #[serde(default)]
    pub analysis_result: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub last_analyzed_at: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<RequestCondition>,
}
