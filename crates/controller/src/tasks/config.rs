//! Analysis Controller Configuration
//!
//! Loaded from the mounted ConfigMap (`/config/config.yaml` by default). Every
//! section has defaults so a partial file is enough.

use crate::engine::{BackoffPolicy, EngineSettings};
use crate::registry::{Lifecycle, RequestKind};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when unset or empty
    #[serde(default, rename = "watchNamespace")]
    pub watch_namespace: Option<String>,

    /// Engine timing
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Ordered analyzer backends per request kind
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<RequestKind, Vec<BackendKind>>,

    /// LLM providers
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vulnerability scanner
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,
}

/// Timeouts and retry delays used by the reconciliation engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Upper bound for a single analyzer call
    #[serde(default = "default_timeout_seconds", rename = "timeoutSeconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_backoff_base_seconds", rename = "backoffBaseSeconds")]
    pub backoff_base_seconds: u64,

    #[serde(default = "default_backoff_max_seconds", rename = "backoffMaxSeconds")]
    pub backoff_max_seconds: u64,

    /// Requeue delay after the cluster API was unreachable
    #[serde(default = "default_fatal_retry_seconds", rename = "fatalRetrySeconds")]
    pub fatal_retry_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_backoff_base_seconds() -> u64 {
    15
}

fn default_backoff_max_seconds() -> u64 {
    600 // 10 minutes
}

fn default_fatal_retry_seconds() -> u64 {
    30
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_max_seconds: default_backoff_max_seconds(),
            fatal_retry_seconds: default_fatal_retry_seconds(),
        }
    }
}

impl AnalysisConfig {
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            analyzer_timeout: Duration::from_secs(self.timeout_seconds),
            backoff: BackoffPolicy {
                base: Duration::from_secs(self.backoff_base_seconds),
                max: Duration::from_secs(self.backoff_max_seconds),
            },
        }
    }

    #[must_use]
    pub fn fatal_retry(&self) -> Duration {
        Duration::from_secs(self.fatal_retry_seconds)
    }
}

/// Analyzer backend names accepted in `backends`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Llm,
    Trivy,
    Dummy,
    DummyScanner,
}

impl BackendKind {
    /// Scanner backends only understand manifests
    #[must_use]
    pub fn is_scanner(self) -> bool {
        matches!(self, BackendKind::Trivy | BackendKind::DummyScanner)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Llm => "llm",
            BackendKind::Trivy => "trivy",
            BackendKind::Dummy => "dummy",
            BackendKind::DummyScanner => "dummy-scanner",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_backends() -> BTreeMap<RequestKind, Vec<BackendKind>> {
    RequestKind::ALL
        .into_iter()
        .filter(|kind| kind.lifecycle() == Lifecycle::Analyzed)
        .map(|kind| (kind, vec![BackendKind::Llm]))
        .collect()
}

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider used when a request does not name one
    #[serde(default = "default_provider_name", rename = "defaultProvider")]
    pub default_provider: String,

    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, LlmProviderConfig>,

    /// Attach live cluster state (pod specs, policies, secret metadata) to prompts
    #[serde(default = "default_true", rename = "clusterContext")]
    pub cluster_context: bool,
}

/// One OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmProviderConfig {
    /// Base URL; `/chat/completions` is appended
    pub endpoint: String,

    pub model: String,

    /// Environment variable holding the API key
    #[serde(default, rename = "apiKeyEnv")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_max_tokens", rename = "maxTokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_providers() -> BTreeMap<String, LlmProviderConfig> {
    BTreeMap::from([(
        default_provider_name(),
        LlmProviderConfig {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        },
    )])
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.2
}

fn default_true() -> bool {
    true
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider_name(),
            providers: default_providers(),
            cluster_context: true,
        }
    }
}

/// Trivy scanner configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    #[serde(default = "default_trivy_path", rename = "trivyPath")]
    pub trivy_path: String,

    /// Extra arguments inserted before the image reference
    #[serde(default, rename = "extraArgs")]
    pub extra_args: Vec<String>,
}

fn default_trivy_path() -> String {
    "trivy".to_string()
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            trivy_path: default_trivy_path(),
            extra_args: Vec::new(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Export traces over OTLP
    #[serde(default)]
    pub enabled: bool,

    /// OTLP gRPC endpoint
    #[serde(default = "default_otlp_endpoint", rename = "otlpEndpoint")]
    pub otlp_endpoint: String,

    #[serde(default = "default_service_name", rename = "serviceName")]
    pub service_name: String,
}

fn default_otlp_endpoint() -> String {
    std::env::var("OTLP_ENDPOINT").unwrap_or_else(|_| "http://localhost:4317".to_string())
}

fn default_service_name() -> String {
    "analysis-controller".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info,analysis_controller=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: default_log_filter(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address", rename = "bindAddress")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl ControllerConfig {
    /// Namespace to watch, treating an empty string as "all namespaces"
    #[must_use]
    pub fn watch_namespace(&self) -> Option<&str> {
        self.watch_namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Validate that configuration is usable
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.analysis.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("analysis.timeoutSeconds must be greater than zero"));
        }
        if self.analysis.backoff_base_seconds == 0 {
            return Err(anyhow::anyhow!(
                "analysis.backoffBaseSeconds must be greater than zero"
            ));
        }
        if self.analysis.backoff_base_seconds > self.analysis.backoff_max_seconds {
            return Err(anyhow::anyhow!(
                "analysis.backoffBaseSeconds ({}) must not exceed analysis.backoffMaxSeconds ({})",
                self.analysis.backoff_base_seconds,
                self.analysis.backoff_max_seconds
            ));
        }

        for kind in RequestKind::ALL {
            let backends = self.backends.get(&kind).map(Vec::as_slice).unwrap_or_default();
            match kind.lifecycle() {
                Lifecycle::Tracked if !backends.is_empty() => {
                    return Err(anyhow::anyhow!(
                        "{kind} requests are tracked, not analyzed; remove them from backends"
                    ));
                }
                Lifecycle::Tracked => {}
                Lifecycle::Analyzed if backends.is_empty() => {
                    return Err(anyhow::anyhow!(
                        "No analyzer backend configured for {kind}. Add an entry under backends."
                    ));
                }
                Lifecycle::Analyzed => {
                    if kind != RequestKind::ManifestAnalysis {
                        if let Some(scanner) = backends.iter().find(|b| b.is_scanner()) {
                            return Err(anyhow::anyhow!(
                                "Backend '{scanner}' can only analyze manifests, not {kind} requests"
                            ));
                        }
                    }
                }
            }
        }

        let uses_llm = self
            .backends
            .values()
            .any(|backends| backends.contains(&BackendKind::Llm));
        if uses_llm {
            if !self.llm.providers.contains_key(&self.llm.default_provider) {
                return Err(anyhow::anyhow!(
                    "Default LLM provider '{}' is not defined under llm.providers",
                    self.llm.default_provider
                ));
            }
            for (name, provider) in &self.llm.providers {
                if provider.endpoint.trim().is_empty() || provider.model.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "LLM provider '{name}' must specify both endpoint and model"
                    ));
                }
            }
        }

        Ok(())
    }

    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    /// Load configuration from a `ConfigMap` through the API
    pub async fn from_configmap(
        client: &Client,
        namespace: &str,
        name: &str,
    ) -> Result<Self, anyhow::Error> {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        let cm = api.get(name).await?;
        Self::from_configmap_data(&cm)
    }

    fn from_configmap_data(cm: &ConfigMap) -> Result<Self, anyhow::Error> {
        let data = cm
            .data
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ConfigMap has no data"))?;
        let config_str = data
            .get("config.yaml")
            .ok_or_else(|| anyhow::anyhow!("ConfigMap missing config.yaml"))?;

        Ok(serde_yaml::from_str(config_str)?)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            analysis: AnalysisConfig::default(),
            backends: default_backends(),
            llm: LlmConfig::default(),
            scanner: ScannerConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}
