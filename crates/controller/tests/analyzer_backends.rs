//! Engine driven by the shipped analyzer backends

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use analysis_controller::analyzers::llm::LlmProvider;
use analysis_controller::analyzers::{DummyScanner, ImageScanAnalyzer, LlmConnector};
use analysis_controller::crds::{
    AIManifestAnalysis, AIManifestAnalysisSpec, AISecretsAudit, AISecretsAuditSpec,
};
use analysis_controller::engine::{ObjectKey, RequestStore, StoreError};
use analysis_controller::telemetry::NoopTelemetry;
use analysis_controller::{AnalyzerRegistry, Engine, EngineSettings, Outcome, RequestKind};
use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Minimal store: one object per key, resource version bumped on every write
struct SingleObjectStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
}

impl<K: Resource + Clone + Serialize + DeserializeOwned> SingleObjectStore<K> {
    fn with(key: &ObjectKey, mut object: K) -> Self {
        object.meta_mut().namespace = Some(key.namespace.clone());
        object.meta_mut().generation = Some(1);
        object.meta_mut().resource_version = Some("1".to_string());
        Self {
            objects: Mutex::new(HashMap::from([(key.clone(), object)])),
        }
    }

    fn get(&self, key: &ObjectKey) -> K {
        self.objects.lock().unwrap()[key].clone()
    }
}

#[async_trait]
impl<K> RequestStore<K> for SingleObjectStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn persist_status(
        &self,
        key: &ObjectKey,
        resource_version: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(key).ok_or(StoreError::Gone)?;
        let current: u64 = object
            .meta()
            .resource_version
            .as_deref()
            .unwrap_or("0")
            .parse()
            .unwrap();
        if current.to_string() != resource_version {
            return Err(StoreError::Conflict);
        }
        let mut value = serde_json::to_value(&*object).unwrap();
        value["status"] = status;
        let mut updated: K = serde_json::from_value(value).unwrap();
        updated.meta_mut().resource_version = Some((current + 1).to_string());
        *object = updated;
        Ok(())
    }
}

fn provider(server: &MockServer) -> LlmProvider {
    LlmProvider {
        name: "local".to_string(),
        endpoint: format!("{}/v1", server.uri()),
        model: "local-model".to_string(),
        api_key: None,
        max_tokens: 256,
        temperature: 0.0,
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
}

#[tokio::test]
async fn test_llm_backend_settles_secrets_audit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"summary": "2 risky secrets", "findings": [
                {"severity": "Critical", "description": "payments/db-password has no rotation annotation"},
                {"severity": "Low", "description": "payments/tls is older than a year"}
            ], "suggestions": ["Move db-password to an external secret store"]}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let registry = AnalyzerRegistry::new().with(
        RequestKind::SecretsAudit,
        Arc::new(LlmConnector::new(provider(&server))),
    );
    let engine = Engine::new(registry, Arc::new(NoopTelemetry), EngineSettings::default());

    let key = ObjectKey::new(RequestKind::SecretsAudit, "payments", "audit");
    let store = SingleObjectStore::with(
        &key,
        AISecretsAudit::new(
            "audit",
            AISecretsAuditSpec {
                namespace: Some("payments".to_string()),
                risk_threshold: Some("High".to_string()),
                ..Default::default()
            },
        ),
    );

    assert_eq!(engine.reconcile(&store, &key).await, Outcome::Done);
    assert_eq!(engine.reconcile(&store, &key).await, Outcome::Done);

    let status = store.get(&key).status.unwrap();
    assert_eq!(status.audit_result.as_deref(), Some("2 risky secrets"));
    assert_eq!(
        status.potentially_leaked_secrets,
        vec!["[CRITICAL] payments/db-password has no rotation annotation"]
    );
    assert_eq!(
        status.recommendations,
        vec!["Move db-password to an external secret store"]
    );
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.error, None);
}

#[tokio::test]
async fn test_llm_outage_is_recorded_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let registry = AnalyzerRegistry::new().with(
        RequestKind::ManifestAnalysis,
        Arc::new(LlmConnector::new(provider(&server))),
    );
    let engine = Engine::new(registry, Arc::new(NoopTelemetry), EngineSettings::default());

    let key = ObjectKey::new(RequestKind::ManifestAnalysis, "default", "review");
    let store = SingleObjectStore::with(
        &key,
        AIManifestAnalysis::new(
            "review",
            AIManifestAnalysisSpec {
                manifest: "apiVersion: v1\nkind: Pod\n".to_string(),
                llm_provider: None,
                analysis_type: None,
            },
        ),
    );

    let outcome = engine.reconcile(&store, &key).await;
    assert!(matches!(outcome, Outcome::RequeueAfter(_)));

    let status = store.get(&key).status.unwrap();
    assert_eq!(status.analysis_result, None);
    assert_eq!(status.observed_generation, None);
    let error = status.error.unwrap();
    assert!(error.contains("503"), "{error}");
    assert!(error.contains("overloaded"), "{error}");
}

#[tokio::test]
async fn test_image_scan_backend_folds_findings_into_result() {
    let registry = AnalyzerRegistry::new().with(
        RequestKind::ManifestAnalysis,
        Arc::new(ImageScanAnalyzer::new(Arc::new(DummyScanner))),
    );
    let engine = Engine::new(registry, Arc::new(NoopTelemetry), EngineSettings::default());

    let key = ObjectKey::new(RequestKind::ManifestAnalysis, "default", "web");
    let manifest = r"
apiVersion: apps/v1
kind: Deployment
spec:
  template:
    spec:
      containers:
        - name: web
          image: nginx:1.25
";
    let store = SingleObjectStore::with(
        &key,
        AIManifestAnalysis::new(
            "web",
            AIManifestAnalysisSpec {
                manifest: manifest.to_string(),
                llm_provider: None,
                analysis_type: Some("security".to_string()),
            },
        ),
    );

    assert_eq!(engine.reconcile(&store, &key).await, Outcome::Done);

    let status = store.get(&key).status.unwrap();
    let result = status.analysis_result.unwrap();
    assert!(result.starts_with("Scanned 1 image(s): 0 critical, 1 high, 1 medium, 1 low"));
    assert!(result.contains("- [HIGH] CVE-2023-0001 in openssl 1.0.0, fixed in 1.0.1 (nginx:1.25)"));
    assert!(status
        .suggestions
        .contains(&"Upgrade openssl to 1.0.1 in nginx:1.25".to_string()));
}
