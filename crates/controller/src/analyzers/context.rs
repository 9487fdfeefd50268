//! Read-only cluster context attached to LLM prompts

use std::fmt::Write as _;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use super::{AnalysisInput, AnalyzerError};

/// Upper bound on objects listed into one prompt
const MAX_LISTED_OBJECTS: u32 = 50;

/// Label set by the external-secrets operator on the secrets it manages
const EXTERNAL_SECRETS_LABEL: &str = "reconcile.external-secrets.io/created-by";

/// Supplies live cluster state relevant to an analysis input
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Rendered context, or `None` when the input needs none
    async fn gather(&self, input: &AnalysisInput) -> Result<Option<String>, AnalyzerError>;
}

/// Context source backed by the Kubernetes API
pub struct KubeContextSource {
    client: Client,
}

impl KubeContextSource {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn pod_spec(&self, namespace: &str, name: &str) -> Result<String, AnalyzerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get_opt(name)
            .await
            .map_err(|e| AnalyzerError::Context(e.to_string()))?
            .ok_or_else(|| AnalyzerError::Context(format!("pod {namespace}/{name} not found")))?;

        let spec = serde_yaml::to_string(&pod.spec)
            .map_err(|e| AnalyzerError::Context(format!("failed to render pod spec: {e}")))?;
        Ok(format!("Pod {namespace}/{name} spec:\n{spec}"))
    }

    async fn network_policies(&self, namespace: Option<&str>) -> Result<String, AnalyzerError> {
        let api: Api<NetworkPolicy> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let policies = api
            .list(&ListParams::default().limit(MAX_LISTED_OBJECTS))
            .await
            .map_err(|e| AnalyzerError::Context(e.to_string()))?;

        if policies.items.is_empty() {
            return Ok("No NetworkPolicies exist in the audited scope.".to_string());
        }

        let mut rendered = String::new();
        for policy in &policies.items {
            let spec = serde_yaml::to_string(&policy.spec)
                .map_err(|e| AnalyzerError::Context(format!("failed to render policy: {e}")))?;
            let _ = write!(
                rendered,
                "NetworkPolicy {}/{}:\n{spec}\n",
                policy.namespace().unwrap_or_default(),
                policy.name_any()
            );
        }
        Ok(rendered)
    }

    async fn secret_metadata(
        &self,
        namespace: Option<&str>,
        include_external: bool,
    ) -> Result<String, AnalyzerError> {
        let api: Api<Secret> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let secrets = api
            .list(&ListParams::default().limit(MAX_LISTED_OBJECTS))
            .await
            .map_err(|e| AnalyzerError::Context(e.to_string()))?;

        let lines: Vec<String> = secrets
            .items
            .iter()
            .filter(|secret| include_external || !is_externally_managed(secret))
            .map(describe_secret)
            .collect();

        debug!(count = lines.len(), "collected secret metadata");
        if lines.is_empty() {
            return Ok("No Secrets exist in the audited scope.".to_string());
        }
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl ContextSource for KubeContextSource {
    async fn gather(&self, input: &AnalysisInput) -> Result<Option<String>, AnalyzerError> {
        match input {
            AnalysisInput::Manifest { .. } => Ok(None),
            AnalysisInput::PodSecurity {
                namespace,
                pod_name,
                ..
            } => self.pod_spec(namespace, pod_name).await.map(Some),
            AnalysisInput::NetworkPolicies { namespace, .. } => {
                self.network_policies(namespace.as_deref()).await.map(Some)
            }
            AnalysisInput::Secrets {
                namespace,
                include_external,
                ..
            } => self
                .secret_metadata(namespace.as_deref(), *include_external)
                .await
                .map(Some),
        }
    }
}

/// Whether a secret is synced by an external secret operator
#[must_use]
pub fn is_externally_managed(secret: &Secret) -> bool {
    let owned = secret
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == "ExternalSecret"));
    owned || secret.labels().contains_key(EXTERNAL_SECRETS_LABEL)
}

/// One line of secret metadata. Values are never included.
#[must_use]
pub fn describe_secret(secret: &Secret) -> String {
    let mut keys: Vec<&str> = secret
        .data
        .as_ref()
        .map(|data| data.keys().map(String::as_str).collect())
        .unwrap_or_default();
    if let Some(string_data) = &secret.string_data {
        keys.extend(string_data.keys().map(String::as_str));
    }
    let annotations: Vec<&str> = secret.annotations().keys().map(String::as_str).collect();

    format!(
        "Secret {}/{} type={} keys=[{}] annotations=[{}] external={}",
        secret.namespace().unwrap_or_default(),
        secret.name_any(),
        secret.type_.as_deref().unwrap_or("Opaque"),
        keys.join(", "),
        annotations.join(", "),
        is_externally_managed(secret)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("payments".to_string()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([(
                "password".to_string(),
                ByteString(b"hunter2".to_vec()),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn test_describe_secret_lists_keys_without_values() {
        let line = describe_secret(&secret("db"));
        assert_eq!(
            line,
            "Secret payments/db type=Opaque keys=[password] annotations=[] external=false"
        );
        assert!(!line.contains("hunter2"));
    }

    #[test]
    fn test_external_secret_detection() {
        let mut by_owner = secret("synced");
        by_owner.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "external-secrets.io/v1beta1".to_string(),
            kind: "ExternalSecret".to_string(),
            name: "synced".to_string(),
            uid: "1234".to_string(),
            ..Default::default()
        }]);
        assert!(is_externally_managed(&by_owner));

        let mut by_label = secret("labelled");
        by_label.metadata.labels = Some(BTreeMap::from([(
            EXTERNAL_SECRETS_LABEL.to_string(),
            "abc".to_string(),
        )]));
        assert!(is_externally_managed(&by_label));

        assert!(!is_externally_managed(&secret("plain")));
    }
}
