//! Manifest analysis by scanning every container image the manifest references

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;

use super::{
    AnalysisInput, Analyzer, AnalyzerError, Findings, ScanReport, Severity, VulnerabilityScanner,
};

const CONTAINER_LISTS: [&str; 3] = ["containers", "initContainers", "ephemeralContainers"];

/// Collect image references from every YAML document in a manifest, in order of appearance
pub fn extract_images(manifest: &str) -> Result<Vec<String>, serde_yaml::Error> {
    let mut images = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = Value::deserialize(document)?;
        collect_images(&value, &mut images);
    }
    Ok(images)
}

fn collect_images(value: &Value, images: &mut Vec<String>) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let is_container_list = key
                    .as_str()
                    .is_some_and(|k| CONTAINER_LISTS.contains(&k));
                if let (true, Value::Sequence(containers)) = (is_container_list, child) {
                    for image in containers.iter().filter_map(|c| c.get("image")?.as_str()) {
                        if !images.iter().any(|known| known == image) {
                            images.push(image.to_string());
                        }
                    }
                } else {
                    collect_images(child, images);
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect_images(item, images);
            }
        }
        Value::Tagged(tagged) => collect_images(&tagged.value, images),
        _ => {}
    }
}

/// Analyzer that turns vulnerability scans into manifest findings
pub struct ImageScanAnalyzer {
    name: String,
    scanner: Arc<dyn VulnerabilityScanner>,
}

impl ImageScanAnalyzer {
    #[must_use]
    pub fn new(scanner: Arc<dyn VulnerabilityScanner>) -> Self {
        Self {
            name: format!("image-scan:{}", scanner.name()),
            scanner,
        }
    }
}

fn summarize(reports: &[ScanReport]) -> String {
    let total = |severity| reports.iter().map(|r| r.count(severity)).sum::<usize>();
    format!(
        "Scanned {} image(s): {} critical, {} high, {} medium, {} low vulnerabilities",
        reports.len(),
        total(Severity::Critical),
        total(Severity::High),
        total(Severity::Medium),
        total(Severity::Low)
    )
}

#[async_trait]
impl Analyzer for ImageScanAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<Findings, AnalyzerError> {
        let AnalysisInput::Manifest { manifest, .. } = input else {
            return Err(AnalyzerError::Unsupported {
                backend: self.name.clone(),
                kind: input.kind(),
            });
        };

        let images = extract_images(manifest)
            .map_err(|e| AnalyzerError::InvalidResponse(format!("manifest is not valid YAML: {e}")))?;
        if images.is_empty() {
            return Ok(Findings::summary(
                "No container images referenced by the manifest",
            ));
        }

        let mut reports = Vec::with_capacity(images.len());
        for image in &images {
            reports.push(self.scanner.scan_image(image).await?);
        }

        let mut findings = Findings::summary(summarize(&reports));
        for report in &reports {
            let mut vulnerabilities: Vec<_> = report.vulnerabilities.iter().collect();
            vulnerabilities.sort_by(|a, b| b.severity.cmp(&a.severity));
            for v in vulnerabilities {
                let fix = v
                    .fixed_version
                    .as_deref()
                    .map(|fixed| format!(", fixed in {fixed}"))
                    .unwrap_or_default();
                findings.findings.push(format!(
                    "[{}] {} in {} {}{fix} ({})",
                    v.severity, v.id, v.package, v.installed_version, report.image
                ));
                if let Some(fixed) = &v.fixed_version {
                    let suggestion =
                        format!("Upgrade {} to {fixed} in {}", v.package, report.image);
                    if !findings.suggestions.contains(&suggestion) {
                        findings.suggestions.push(suggestion);
                    }
                }
            }
        }
        Ok(findings)
    }
}
