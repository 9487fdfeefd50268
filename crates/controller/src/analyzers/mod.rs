//! Analyzer capabilities
//!
//! The engine only depends on the traits in this module. Concrete backends
//! (LLM reviewer, Trivy scanner, offline dummies) live in the submodules and are
//! selected by configuration through [`Backends`].

pub mod context;
pub mod dummy;
pub mod image_scan;
pub mod llm;
pub mod prompt;
pub mod scanner;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::registry::RequestKind;
use crate::tasks::config::{BackendKind, ControllerConfig};

pub use context::{ContextSource, KubeContextSource};
pub use dummy::DummyLlmAnalyzer;
pub use image_scan::ImageScanAnalyzer;
pub use llm::LlmConnector;
pub use scanner::{DummyScanner, ScanReport, TrivyScanner, Vulnerability};

/// Errors reported by analyzer backends. Every variant is retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("{0}")]
    Unavailable(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("invalid analyzer response: {0}")]
    InvalidResponse(String),

    #[error("cluster context unavailable: {0}")]
    Context(String),

    #[error("backend {backend} cannot analyze {kind} requests")]
    Unsupported { backend: String, kind: RequestKind },
}

/// Severity attached to a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Informational => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" | "moderate" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" | "informational" => Ok(Severity::Informational),
            _ => Err(value.to_string()),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed analyzer input, extracted from a request spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisInput {
    Manifest {
        manifest: String,
        provider: Option<String>,
        analysis_type: Option<String>,
    },
    NetworkPolicies {
        namespace: Option<String>,
        include_baseline: bool,
        custom_rules: Option<String>,
    },
    PodSecurity {
        namespace: String,
        pod_name: String,
        profile: String,
        include_recommendations: bool,
    },
    Secrets {
        namespace: Option<String>,
        include_external: bool,
        audit_type: Option<String>,
        risk_threshold: Option<Severity>,
    },
}

impl AnalysisInput {
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        match self {
            AnalysisInput::Manifest { .. } => RequestKind::ManifestAnalysis,
            AnalysisInput::NetworkPolicies { .. } => RequestKind::NetworkPolicyAudit,
            AnalysisInput::PodSecurity { .. } => RequestKind::PodSecurityAssessment,
            AnalysisInput::Secrets { .. } => RequestKind::SecretsAudit,
        }
    }

    /// LLM provider requested by the spec, if any
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            AnalysisInput::Manifest { provider, .. } => provider.as_deref(),
            _ => None,
        }
    }

    /// Short human description of what is being analyzed
    #[must_use]
    pub fn subject(&self) -> String {
        fn scope(namespace: Option<&str>) -> String {
            namespace.map_or_else(|| "all namespaces".to_string(), |ns| format!("namespace {ns}"))
        }

        match self {
            AnalysisInput::Manifest { manifest, .. } => {
                format!("manifest ({} bytes)", manifest.len())
            }
            AnalysisInput::NetworkPolicies { namespace, .. } => {
                format!("network policies in {}", scope(namespace.as_deref()))
            }
            AnalysisInput::PodSecurity {
                namespace,
                pod_name,
                ..
            } => format!("pod {namespace}/{pod_name}"),
            AnalysisInput::Secrets { namespace, .. } => {
                format!("secrets in {}", scope(namespace.as_deref()))
            }
        }
    }
}

/// Output of a successful analysis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub summary: String,
    pub findings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Findings {
    #[must_use]
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    /// Combine two results; summaries are joined by a blank line and suggestions deduplicated
    #[must_use]
    pub fn merge(mut self, other: Findings) -> Findings {
        if !other.summary.is_empty() {
            if self.summary.is_empty() {
                self.summary = other.summary;
            } else {
                self.summary = format!("{}\n\n{}", self.summary, other.summary);
            }
        }
        self.findings.extend(other.findings);
        for suggestion in other.suggestions {
            if !self.suggestions.contains(&suggestion) {
                self.suggestions.push(suggestion);
            }
        }
        self
    }
}

/// Produces findings for a single analysis input
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, input: &AnalysisInput) -> Result<Findings, AnalyzerError>;
}

/// Aggregates several anomaly descriptions into one narrative
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, events: &[String]) -> Result<String, AnalyzerError>;
}

/// Scans a container image for known vulnerabilities
#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    fn name(&self) -> &str;

    async fn scan_image(&self, image: &str) -> Result<ScanReport, AnalyzerError>;
}

/// Runs several analyzers in order and merges their findings
pub struct CompositeAnalyzer {
    name: String,
    members: Vec<Arc<dyn Analyzer>>,
}

impl CompositeAnalyzer {
    #[must_use]
    pub fn new(members: Vec<Arc<dyn Analyzer>>) -> Self {
        let name = members
            .iter()
            .map(|m| m.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, members }
    }
}

#[async_trait]
impl Analyzer for CompositeAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<Findings, AnalyzerError> {
        let mut merged: Option<Findings> = None;
        for member in &self.members {
            debug!(backend = member.name(), "running composite member");
            let findings = member.analyze(input).await?;
            merged = Some(match merged {
                Some(acc) => acc.merge(findings),
                None => findings,
            });
        }
        Ok(merged.unwrap_or_default())
    }
}

/// Backend instances built from configuration, shared by every request kind
pub struct Backends {
    llm: Option<Arc<LlmConnector>>,
    dummy: Arc<DummyLlmAnalyzer>,
    trivy: Option<Arc<TrivyScanner>>,
    dummy_scanner: Arc<DummyScanner>,
}

impl Backends {
    /// Build only the backends referenced by the configuration.
    ///
    /// The cluster client is optional so backends can be built without a cluster;
    /// the LLM backend then runs without cluster context.
    pub fn from_config(config: &ControllerConfig, client: Option<Client>) -> anyhow::Result<Self> {
        let used: BTreeSet<BackendKind> = config.backends.values().flatten().copied().collect();

        let llm = if used.contains(&BackendKind::Llm) {
            let mut connector = LlmConnector::from_config(&config.llm)?;
            match client {
                Some(client) if config.llm.cluster_context => {
                    connector = connector.with_context_source(Arc::new(KubeContextSource::new(client)));
                }
                _ => debug!("LLM backend runs without cluster context"),
            }
            Some(Arc::new(connector))
        } else {
            None
        };

        let trivy = used
            .contains(&BackendKind::Trivy)
            .then(|| Arc::new(TrivyScanner::from_config(&config.scanner)));

        info!(
            backends = ?used,
            "Analyzer backends configured"
        );

        Ok(Self {
            llm,
            dummy: Arc::new(DummyLlmAnalyzer),
            trivy,
            dummy_scanner: Arc::new(DummyScanner),
        })
    }

    /// Analyzer for a backend name, `None` when that backend was not built
    #[must_use]
    pub fn analyzer(&self, kind: BackendKind) -> Option<Arc<dyn Analyzer>> {
        match kind {
            BackendKind::Llm => self.llm.clone().map(|llm| llm as Arc<dyn Analyzer>),
            BackendKind::Dummy => Some(self.dummy.clone() as Arc<dyn Analyzer>),
            BackendKind::Trivy => self.trivy.clone().map(|scanner| {
                Arc::new(ImageScanAnalyzer::new(scanner)) as Arc<dyn Analyzer>
            }),
            BackendKind::DummyScanner => Some(
                Arc::new(ImageScanAnalyzer::new(self.dummy_scanner.clone())) as Arc<dyn Analyzer>,
            ),
        }
    }

    /// Summarizer used for anomaly reports: the LLM when configured, otherwise the dummy
    #[must_use]
    pub fn summarizer(&self) -> Arc<dyn Summarizer> {
        match &self.llm {
            Some(llm) => llm.clone() as Arc<dyn Summarizer>,
            None => self.dummy.clone() as Arc<dyn Summarizer>,
        }
    }
}
