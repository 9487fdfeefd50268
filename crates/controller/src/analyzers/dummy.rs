//! Offline analyzer for development clusters without an LLM provider

use async_trait::async_trait;

use super::{AnalysisInput, Analyzer, AnalyzerError, Findings, Summarizer};

/// Deterministic analyzer that returns canned results
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyLlmAnalyzer;

#[async_trait]
impl Analyzer for DummyLlmAnalyzer {
    fn name(&self) -> &str {
        "dummy"
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<Findings, AnalyzerError> {
        let mut suggestions = vec!["Configure an LLM provider for a full review".to_string()];
        if let AnalysisInput::PodSecurity {
            include_recommendations: false,
            ..
        } = input
        {
            suggestions.clear();
        }

        Ok(Findings {
            summary: format!(
                "Dummy analysis of {}: no issues detected by offline checks",
                input.subject()
            ),
            findings: Vec::new(),
            suggestions,
        })
    }
}

#[async_trait]
impl Summarizer for DummyLlmAnalyzer {
    async fn summarize(&self, events: &[String]) -> Result<String, AnalyzerError> {
        Ok(format!(
            "Dummy summary of {} security anomalies. General advice: investigate all anomalies thoroughly.",
            events.len()
        ))
    }
}
