//! Prompt rendering and reply parsing for the LLM backend

use std::fmt::Write as _;

use serde::Deserialize;

use super::{AnalysisInput, Findings, Severity};

pub const SYSTEM_PROMPT: &str = "You are a Kubernetes security reviewer. \
Respond with a single JSON object with the keys \"summary\" (string), \
\"findings\" (array of objects with \"severity\" one of Critical, High, Medium, Low, Informational \
and \"description\") and \"suggestions\" (array of strings). \
Do not add any text outside the JSON object.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a Kubernetes security analyst writing for a cluster operator.";

/// Checklist appended to network policy audits that ask for baseline checks
pub const BASELINE_NETWORK_POLICIES: &[&str] = &[
    "a default-deny ingress policy exists in every audited namespace",
    "egress is default-deny or restricted to an explicit allow-list",
    "no policy allows ingress from all namespaces without a podSelector",
    "DNS egress is limited to the cluster DNS service",
];

/// Render the user prompt for an input, with optional live cluster state
#[must_use]
pub fn render(input: &AnalysisInput, cluster_context: Option<&str>) -> String {
    let mut prompt = String::new();

    match input {
        AnalysisInput::Manifest {
            manifest,
            analysis_type,
            ..
        } => {
            let focus = analysis_type.as_deref().map_or_else(
                || "for security issues and best-practice violations".to_string(),
                |t| format!("with a focus on {t}"),
            );
            let _ = write!(
                prompt,
                "Analyze the following Kubernetes manifest {focus}.\n\nManifest:\n```yaml\n{}\n```",
                manifest.trim_end()
            );
        }
        AnalysisInput::NetworkPolicies {
            namespace,
            include_baseline,
            custom_rules,
        } => {
            let scope = namespace
                .as_deref()
                .map_or_else(|| "all namespaces".to_string(), |ns| format!("namespace {ns}"));
            let _ = write!(
                prompt,
                "Audit the NetworkPolicies in {scope}. Report each non-compliant policy as a finding that names it as namespace/name."
            );
            if *include_baseline {
                prompt.push_str("\n\nAlso check them against these baseline policies:");
                for rule in BASELINE_NETWORK_POLICIES {
                    let _ = write!(prompt, "\n- {rule}");
                }
            }
            if let Some(rules) = custom_rules {
                let _ = write!(prompt, "\n\nApply these additional audit rules:\n{rules}");
            }
        }
        AnalysisInput::PodSecurity {
            namespace,
            pod_name,
            profile,
            include_recommendations,
        } => {
            let _ = write!(
                prompt,
                "Assess pod {namespace}/{pod_name} against the Pod Security Standards \"{profile}\" profile. Report each violation as a finding."
            );
            if *include_recommendations {
                prompt.push_str(" Include remediation recommendations as suggestions.");
            } else {
                prompt.push_str(" Do not include suggestions.");
            }
        }
        AnalysisInput::Secrets {
            namespace,
            include_external,
            audit_type,
            risk_threshold,
        } => {
            let scope = namespace
                .as_deref()
                .map_or_else(|| "all namespaces".to_string(), |ns| format!("namespace {ns}"));
            let _ = write!(prompt, "Audit the Secrets in {scope}");
            if let Some(audit_type) = audit_type {
                let _ = write!(prompt, " with a focus on {audit_type}");
            }
            prompt.push_str(". Report secrets that look leaked, stale or over-shared as findings.");
            if *include_external {
                prompt.push_str(" Include secrets managed by external secret operators.");
            } else {
                prompt.push_str(" Ignore secrets managed by external secret operators.");
            }
            if let Some(threshold) = risk_threshold {
                let _ = write!(prompt, " Only report findings of severity {threshold} or higher.");
            }
        }
    }

    if let Some(context) = cluster_context {
        let _ = write!(prompt, "\n\nCurrent cluster state:\n{context}");
    }

    prompt
}

/// Prompt asking for one narrative over several anomaly descriptions
#[must_use]
pub fn summary_prompt(events: &[String]) -> String {
    let mut prompt = format!(
        "Summarize the following {} security anomalies into one short narrative. \
Group related anomalies and name the most urgent ones first.\n",
        events.len()
    );
    for event in events {
        let _ = write!(prompt, "\n- {event}");
    }
    prompt
}

#[derive(Deserialize)]
struct ReplyBody {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    findings: Vec<ReplyFinding>,
    #[serde(default)]
    suggestions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyFinding {
    Described {
        #[serde(default)]
        severity: Option<String>,
        description: String,
    },
    Plain(String),
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Turn a model reply into findings, honoring the input's filters.
///
/// A reply that is not the requested JSON object becomes the summary as-is.
#[must_use]
pub fn parse_reply(reply: &str, input: &AnalysisInput) -> Findings {
    let body = strip_code_fence(reply);
    let Ok(parsed) = serde_json::from_str::<ReplyBody>(body) else {
        return Findings::summary(reply.trim());
    };

    let threshold = match input {
        AnalysisInput::Secrets { risk_threshold, .. } => *risk_threshold,
        _ => None,
    };

    let findings: Vec<String> = parsed
        .findings
        .into_iter()
        .filter_map(|finding| match finding {
            ReplyFinding::Plain(description) => Some(description),
            ReplyFinding::Described {
                severity,
                description,
            } => {
                let severity = severity.and_then(|s| s.parse::<Severity>().ok());
                if let (Some(threshold), Some(severity)) = (threshold, severity) {
                    if severity < threshold {
                        return None;
                    }
                }
                Some(match severity {
                    Some(severity) => format!("[{severity}] {description}"),
                    None => description,
                })
            }
        })
        .collect();

    let suggestions = match input {
        AnalysisInput::PodSecurity {
            include_recommendations: false,
            ..
        } => Vec::new(),
        _ => parsed.suggestions,
    };

    let summary = if parsed.summary.trim().is_empty() {
        if findings.is_empty() {
            "No issues found".to_string()
        } else {
            format!("{} finding(s) reported", findings.len())
        }
    } else {
        parsed.summary.trim().to_string()
    };

    Findings {
        summary,
        findings,
        suggestions,
    }
}
