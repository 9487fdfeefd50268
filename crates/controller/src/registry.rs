//! Request registry
//!
//! One entry per request kind: how to extract analyzer input from the spec, how
//! to shape findings into that kind's status fields, and which analyzer serves it.
//! The engine is generic over [`AnalysisRequest`] and never branches on kind.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::analyzers::{AnalysisInput, Analyzer, Backends, CompositeAnalyzer, Findings, Severity};
use crate::crds::{
    AIManifestAnalysis, AINetworkPolicyAudit, AIPodSecurityAssessment, AISecretsAudit,
};
use crate::engine::projector::AnalysisStatus;
use crate::tasks::config::ControllerConfig;

/// The five request kinds served by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    ManifestAnalysis,
    NetworkPolicyAudit,
    PodSecurityAssessment,
    SecretsAudit,
    SecurityAnomaly,
}

/// How the controller drives a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Spec changes trigger a fresh analysis
    Analyzed,
    /// Only first observation is recorded; state is edited externally
    Tracked,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::ManifestAnalysis,
        RequestKind::NetworkPolicyAudit,
        RequestKind::PodSecurityAssessment,
        RequestKind::SecretsAudit,
        RequestKind::SecurityAnomaly,
    ];

    #[must_use]
    pub fn lifecycle(self) -> Lifecycle {
        match self {
            RequestKind::SecurityAnomaly => Lifecycle::Tracked,
            _ => Lifecycle::Analyzed,
        }
    }

    /// Custom resource kind name
    #[must_use]
    pub fn resource_kind(self) -> &'static str {
        match self {
            RequestKind::ManifestAnalysis => "AIManifestAnalysis",
            RequestKind::NetworkPolicyAudit => "AINetworkPolicyAudit",
            RequestKind::PodSecurityAssessment => "AIPodSecurityAssessment",
            RequestKind::SecretsAudit => "AISecretsAudit",
            RequestKind::SecurityAnomaly => "AISecurityAnomaly",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_kind())
    }
}

/// A spec that fails a precondition; retrying would reproduce the failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidSpec {
    #[error("spec.{field} must not be empty")]
    MissingField { field: &'static str },

    #[error("spec.manifest is not valid YAML: {0}")]
    MalformedManifest(String),

    #[error("spec.riskThreshold \"{0}\" is not one of Critical, High, Medium, Low, Informational")]
    UnknownRiskThreshold(String),
}

/// Registry entry for an analyzer-backed request kind
pub trait AnalysisRequest:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: RequestKind;

    /// Validate the spec and extract the analyzer input
    fn analysis_input(&self) -> Result<AnalysisInput, InvalidSpec>;

    /// Current status in canonical form
    fn analysis_status(&self) -> AnalysisStatus;

    /// Wire form of a canonical status for this kind
    fn status_patch(status: &AnalysisStatus) -> serde_json::Value;

    /// Adapt analyzer findings to what this kind's status can hold
    fn shape_findings(findings: Findings) -> Findings {
        findings
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn validate_manifest(manifest: &str) -> Result<(), InvalidSpec> {
    if manifest.trim().is_empty() {
        return Err(InvalidSpec::MissingField { field: "manifest" });
    }
    for document in serde_yaml::Deserializer::from_str(manifest) {
        serde_yaml::Value::deserialize(document)
            .map_err(|e| InvalidSpec::MalformedManifest(e.to_string()))?;
    }
    Ok(())
}

impl AnalysisRequest for AIManifestAnalysis {
    const KIND: RequestKind = RequestKind::ManifestAnalysis;

    fn analysis_input(&self) -> Result<AnalysisInput, InvalidSpec> {
        validate_manifest(&self.spec.manifest)?;
        Ok(AnalysisInput::Manifest {
            manifest: self.spec.manifest.clone(),
            provider: non_empty(self.spec.llm_provider.as_ref()),
            analysis_type: non_empty(self.spec.analysis_type.as_ref()),
        })
    }

    fn analysis_status(&self) -> AnalysisStatus {
        let status = self.status.clone().unwrap_or_default();
        AnalysisStatus {
            result: status.analysis_result,
            findings: Vec::new(),
            suggestions: status.suggestions,
            error: status.error,
            last_processed_at: status.last_analyzed_at,
            observed_generation: status.observed_generation,
            conditions: status.conditions,
        }
    }

    fn status_patch(status: &AnalysisStatus) -> serde_json::Value {
        json!({
            "analysisResult": status.result,
            "suggestions": status.suggestions,
            "error": status.error,
            "lastAnalyzedAt": status.last_processed_at,
            "observedGeneration": status.observed_generation,
            "conditions": status.conditions,
        })
    }

    /// Manifest status has no findings list, so findings become bullet lines of the result
    fn shape_findings(findings: Findings) -> Findings {
        if findings.findings.is_empty() {
            return findings;
        }
        let mut lines = Vec::with_capacity(findings.findings.len() + 1);
        if !findings.summary.is_empty() {
            lines.push(findings.summary);
        }
        lines.extend(findings.findings.iter().map(|f| format!("- {f}")));
        Findings {
            summary: lines.join("\n"),
            findings: Vec::new(),
            suggestions: findings.suggestions,
        }
    }
}

impl AnalysisRequest for AINetworkPolicyAudit {
    const KIND: RequestKind = RequestKind::NetworkPolicyAudit;

    fn analysis_input(&self) -> Result<AnalysisInput, InvalidSpec> {
        Ok(AnalysisInput::NetworkPolicies {
            namespace: non_empty(self.spec.namespace.as_ref()),
            include_baseline: self.spec.include_baseline_policies,
            custom_rules: non_empty(self.spec.custom_audit_rules.as_ref()),
        })
    }

    fn analysis_status(&self) -> AnalysisStatus {
        let status = self.status.clone().unwrap_or_default();
        AnalysisStatus {
            result: status.audit_result,
            findings: status.non_compliant_policies,
            suggestions: status.suggestions,
            error: status.error,
            last_processed_at: status.last_audit_time,
            observed_generation: status.observed_generation,
            conditions: status.conditions,
        }
    }

    fn status_patch(status: &AnalysisStatus) -> serde_json::Value {
        json!({
            "auditResult": status.result,
            "nonCompliantPolicies": status.findings,
            "suggestions": status.suggestions,
            "lastAuditTime": status.last_processed_at,
            "error": status.error,
            "observedGeneration": status.observed_generation,
            "conditions": status.conditions,
        })
    }
}

impl AnalysisRequest for AIPodSecurityAssessment {
    const KIND: RequestKind = RequestKind::PodSecurityAssessment;

    fn analysis_input(&self) -> Result<AnalysisInput, InvalidSpec> {
        let pod_name = non_empty(Some(&self.spec.pod_name))
            .ok_or(InvalidSpec::MissingField { field: "podName" })?;
        let namespace = non_empty(Some(&self.spec.namespace))
            .ok_or(InvalidSpec::MissingField { field: "namespace" })?;

        Ok(AnalysisInput::PodSecurity {
            namespace,
            pod_name,
            profile: non_empty(self.spec.security_profile.as_ref())
                .unwrap_or_else(|| "baseline".to_string()),
            include_recommendations: self.spec.include_recommendations,
        })
    }

    fn analysis_status(&self) -> AnalysisStatus {
        let status = self.status.clone().unwrap_or_default();
        AnalysisStatus {
            result: status.assessment_result,
            findings: status.violations,
            suggestions: status.recommendations,
            error: status.error,
            last_processed_at: status.last_assessment_time,
            observed_generation: status.observed_generation,
            conditions: status.conditions,
        }
    }

    fn status_patch(status: &AnalysisStatus) -> serde_json::Value {
        json!({
            "assessmentResult": status.result,
            "violations": status.findings,
            "recommendations": status.suggestions,
            "lastAssessmentTime": status.last_processed_at,
            "error": status.error,
            "observedGeneration": status.observed_generation,
            "conditions": status.conditions,
        })
    }
}

impl AnalysisRequest for AISecretsAudit {
    const KIND: RequestKind = RequestKind::SecretsAudit;

    fn analysis_input(&self) -> Result<AnalysisInput, InvalidSpec> {
        let risk_threshold = match non_empty(self.spec.risk_threshold.as_ref()) {
            Some(raw) => Some(
                raw.parse::<Severity>()
                    .map_err(InvalidSpec::UnknownRiskThreshold)?,
            ),
            None => None,
        };

        Ok(AnalysisInput::Secrets {
            namespace: non_empty(self.spec.namespace.as_ref()),
            include_external: self.spec.include_external_secrets,
            audit_type: non_empty(self.spec.audit_type.as_ref()),
            risk_threshold,
        })
    }

    fn analysis_status(&self) -> AnalysisStatus {
        let status = self.status.clone().unwrap_or_default();
        AnalysisStatus {
            result: status.audit_result,
            findings: status.potentially_leaked_secrets,
            suggestions: status.recommendations,
            error: status.error,
            last_processed_at: status.last_audit_time,
            observed_generation: status.observed_generation,
            conditions: status.conditions,
        }
    }

    fn status_patch(status: &AnalysisStatus) -> serde_json::Value {
        json!({
            "auditResult": status.result,
            "potentiallyLeakedSecrets": status.findings,
            "recommendations": status.suggestions,
            "lastAuditTime": status.last_processed_at,
            "error": status.error,
            "observedGeneration": status.observed_generation,
            "conditions": status.conditions,
        })
    }
}

/// Analyzer selected for each analyzer-backed kind
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<RequestKind, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, kind: RequestKind, analyzer: Arc<dyn Analyzer>) -> Self {
        self.register(kind, analyzer);
        self
    }

    pub fn register(&mut self, kind: RequestKind, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(kind, analyzer);
    }

    #[must_use]
    pub fn analyzer_for(&self, kind: RequestKind) -> Option<Arc<dyn Analyzer>> {
        self.analyzers.get(&kind).cloned()
    }

    /// Wire the configured backends to each kind, composing when a kind lists several
    pub fn from_config(config: &ControllerConfig, backends: &Backends) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        for (kind, names) in &config.backends {
            if kind.lifecycle() == Lifecycle::Tracked || names.is_empty() {
                continue;
            }

            let mut members = Vec::with_capacity(names.len());
            for name in names {
                let analyzer = backends.analyzer(*name).ok_or_else(|| {
                    anyhow::anyhow!("Backend '{name}' selected for {kind} is not available")
                })?;
                members.push(analyzer);
            }

            let analyzer = if members.len() == 1 {
                members.remove(0)
            } else {
                Arc::new(CompositeAnalyzer::new(members)) as Arc<dyn Analyzer>
            };
            info!(kind = %kind, backend = analyzer.name(), "Registered analyzer");
            registry.register(*kind, analyzer);
        }
        Ok(registry)
    }
}
