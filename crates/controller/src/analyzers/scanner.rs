//! Container image vulnerability scanners

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{AnalyzerError, Severity, VulnerabilityScanner};
use crate::tasks::config::ScannerConfig;

/// One vulnerability in a scanned image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vulnerability {
    pub id: String,
    pub severity: Severity,
    pub package: String,
    pub installed_version: String,
    pub fixed_version: Option<String>,
    pub title: Option<String>,
}

/// Result of scanning one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub image: String,
    pub vulnerabilities: Vec<Vulnerability>,
}

impl ScanReport {
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }
}

/// Runs the Trivy CLI
#[derive(Debug, Clone)]
pub struct TrivyScanner {
    binary: String,
    extra_args: Vec<String>,
}

impl TrivyScanner {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            binary: config.trivy_path.clone(),
            extra_args: config.extra_args.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyReport {
    #[serde(default)]
    results: Option<Vec<TrivyResult>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyResult {
    #[serde(default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    id: String,
    #[serde(rename = "PkgName")]
    package: String,
    #[serde(rename = "InstalledVersion", default)]
    installed_version: String,
    #[serde(rename = "FixedVersion", default)]
    fixed_version: Option<String>,
    #[serde(rename = "Severity", default)]
    severity: String,
    #[serde(rename = "Title", default)]
    title: Option<String>,
}

/// Parse `trivy image --format json` output
pub fn parse_trivy_report(image: &str, raw: &[u8]) -> Result<ScanReport, AnalyzerError> {
    let report: TrivyReport = serde_json::from_slice(raw)
        .map_err(|e| AnalyzerError::InvalidResponse(format!("trivy report for {image}: {e}")))?;

    let vulnerabilities = report
        .results
        .unwrap_or_default()
        .into_iter()
        .flat_map(|result| result.vulnerabilities.unwrap_or_default())
        .map(|v| Vulnerability {
            severity: v.severity.parse().unwrap_or(Severity::Informational),
            id: v.id,
            package: v.package,
            installed_version: v.installed_version,
            fixed_version: v.fixed_version.filter(|f| !f.is_empty()),
            title: v.title,
        })
        .collect();

    Ok(ScanReport {
        image: image.to_string(),
        vulnerabilities,
    })
}

#[async_trait]
impl VulnerabilityScanner for TrivyScanner {
    fn name(&self) -> &str {
        "trivy"
    }

    async fn scan_image(&self, image: &str) -> Result<ScanReport, AnalyzerError> {
        debug!(image, binary = %self.binary, "scanning image");
        let output = Command::new(&self.binary)
            .args(["image", "--quiet", "--format", "json"])
            .args(&self.extra_args)
            .arg(image)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AnalyzerError::Unavailable(format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalyzerError::Unavailable(format!(
                "trivy failed for {image} ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_trivy_report(image, &output.stdout)
    }
}

/// Scanner that reports the same three vulnerabilities for every image
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyScanner;

#[async_trait]
impl VulnerabilityScanner for DummyScanner {
    fn name(&self) -> &str {
        "dummy-scanner"
    }

    async fn scan_image(&self, image: &str) -> Result<ScanReport, AnalyzerError> {
        let vulnerability = |id: &str, severity, package: &str, fixed: Option<&str>| Vulnerability {
            id: id.to_string(),
            severity,
            package: package.to_string(),
            installed_version: "1.0.0".to_string(),
            fixed_version: fixed.map(str::to_string),
            title: None,
        };

        Ok(ScanReport {
            image: image.to_string(),
            vulnerabilities: vec![
                vulnerability("CVE-2023-0001", Severity::High, "openssl", Some("1.0.1")),
                vulnerability("CVE-2023-0002", Severity::Medium, "zlib", Some("1.0.2")),
                vulnerability("CVE-2023-0003", Severity::Low, "busybox", None),
            ],
        })
    }
}
