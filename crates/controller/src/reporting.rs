//! Cross-cutting anomaly reports
//!
//! Collects open security anomalies and asks the summarizer for one narrative.
//! This sits outside the per-object engine and never writes to the cluster.

use std::sync::Arc;

use chrono::Utc;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::analyzers::Summarizer;
use crate::crds::AISecurityAnomaly;
use crate::tasks::types::Result;

const NO_OPEN_ANOMALIES: &str = "No open security anomalies";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub report_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub open_anomalies: Vec<String>,
    pub summary: String,
    pub generated_at: String,
}

/// One line per open anomaly, in the order given
#[must_use]
pub fn describe_open_anomalies(anomalies: &[AISecurityAnomaly]) -> Vec<String> {
    anomalies
        .iter()
        .filter(|anomaly| anomaly.is_open())
        .map(|anomaly| {
            let state = anomaly
                .status
                .as_ref()
                .and_then(|s| s.state.as_deref())
                .unwrap_or("New");
            let mut line = format!(
                "[{}] {}/{} ({}): {}",
                anomaly.spec.severity,
                anomaly.namespace().unwrap_or_default(),
                anomaly.name_any(),
                state,
                anomaly.spec.description
            );
            if let Some(resource) = &anomaly.spec.affected_resource {
                line.push_str(&format!(" affecting {resource}"));
            }
            line
        })
        .collect()
}

/// Build a report from already-described anomalies; the summarizer is skipped when there are none
pub async fn build_report(
    namespace: Option<String>,
    open_anomalies: Vec<String>,
    summarizer: &dyn Summarizer,
) -> Result<AnomalyReport> {
    let summary = if open_anomalies.is_empty() {
        NO_OPEN_ANOMALIES.to_string()
    } else {
        summarizer.summarize(&open_anomalies).await?
    };

    Ok(AnomalyReport {
        report_id: Uuid::new_v4().to_string(),
        namespace,
        open_anomalies,
        summary,
        generated_at: Utc::now().to_rfc3339(),
    })
}

/// List open anomalies, in one namespace or cluster-wide, and summarize them
#[instrument(skip(client, summarizer))]
pub async fn summarize_open_anomalies(
    client: Client,
    namespace: Option<String>,
    summarizer: Arc<dyn Summarizer>,
) -> Result<AnomalyReport> {
    let api: Api<AISecurityAnomaly> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let anomalies = api.list(&ListParams::default()).await?;
    let open = describe_open_anomalies(&anomalies.items);
    debug!(
        total = anomalies.items.len(),
        open = open.len(),
        "Collected security anomalies"
    );
    build_report(namespace, open, summarizer.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::dummy::DummyLlmAnalyzer;
    use crate::analyzers::AnalyzerError;
    use crate::crds::{AISecurityAnomalySpec, AISecurityAnomalyStatus};
    use crate::tasks::types::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, events: &[String]) -> Result<String, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} events", events.len()))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _events: &[String]) -> Result<String, AnalyzerError> {
            Err(AnalyzerError::Unavailable("llm down".to_string()))
        }
    }

    fn anomaly(name: &str, state: Option<&str>) -> AISecurityAnomaly {
        let mut anomaly = AISecurityAnomaly::new(
            name,
            AISecurityAnomalySpec {
                description: "Shell spawned in container".to_string(),
                severity: "Critical".to_string(),
                source_component: None,
                affected_resource: Some("pod/cart-0".to_string()),
                anomaly_type: None,
            },
        );
        anomaly.metadata.namespace = Some("shop".to_string());
        anomaly.status = state.map(|state| AISecurityAnomalyStatus {
            state: Some(state.to_string()),
            ..Default::default()
        });
        anomaly
    }

    #[test]
    fn test_only_open_anomalies_are_described() {
        let lines = describe_open_anomalies(&[
            anomaly("shell", None),
            anomaly("miner", Some("Resolved")),
            anomaly("scan", Some("Investigating")),
            anomaly("noise", Some("FalsePositive")),
        ]);

        assert_eq!(
            lines,
            vec![
                "[Critical] shop/shell (New): Shell spawned in container affecting pod/cart-0",
                "[Critical] shop/scan (Investigating): Shell spawned in container affecting pod/cart-0",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_report_skips_summarizer() {
        let summarizer = CountingSummarizer::default();
        let report = tokio_test::assert_ok!(build_report(None, Vec::new(), &summarizer).await);

        assert_eq!(report.summary, NO_OPEN_ANOMALIES);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_report_uses_summarizer() {
        let report = build_report(
            Some("shop".to_string()),
            vec!["a".to_string(), "b".to_string()],
            &DummyLlmAnalyzer,
        )
        .await
        .unwrap();

        assert_eq!(
            report.summary,
            "Dummy summary of 2 security anomalies. General advice: investigate all anomalies thoroughly."
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["namespace"], "shop");
        assert_eq!(json["openAnomalies"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_summarizer_failure_is_reported() {
        let result = build_report(None, vec!["a".to_string()], &FailingSummarizer).await;
        assert!(matches!(result, Err(Error::Analyzer(_))));
    }
}
