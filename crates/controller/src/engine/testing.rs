//! In-memory doubles for engine tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::Span;

use super::store::{ObjectKey, RequestStore, StoreError};
use crate::analyzers::{AnalysisInput, Analyzer, AnalyzerError, Findings};
use crate::crds::{AIManifestAnalysis, AIManifestAnalysisSpec};
use crate::telemetry::{Attributes, SpanGuard, TelemetrySink};

pub fn manifest_request(name: &str, manifest: &str) -> AIManifestAnalysis {
    let mut request = AIManifestAnalysis::new(
        name,
        AIManifestAnalysisSpec {
            manifest: manifest.to_string(),
            llm_provider: None,
            analysis_type: Some("security".to_string()),
        },
    );
    request.metadata.namespace = Some("default".to_string());
    request
}

/// Store with API-server-like resource versions and generations
pub struct MemoryStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    next_version: AtomicUsize,
    conflicts_to_inject: AtomicUsize,
    persists: AtomicUsize,
    unavailable: AtomicBool,
    unavailable_on_persist: AtomicBool,
    rejecting_persists: AtomicBool,
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            next_version: AtomicUsize::new(1),
            conflicts_to_inject: AtomicUsize::new(0),
            persists: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            unavailable_on_persist: AtomicBool::new(false),
            rejecting_persists: AtomicBool::new(false),
        }
    }

    fn bump_version(&self, object: &mut K) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        object.meta_mut().resource_version = Some(version.to_string());
    }

    pub fn insert(&self, key: &ObjectKey, mut object: K) {
        object.meta_mut().generation.get_or_insert(1);
        self.bump_version(&mut object);
        self.objects.lock().unwrap().insert(key.clone(), object);
    }

    pub fn get(&self, key: &ObjectKey) -> Option<K> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &ObjectKey) {
        self.objects.lock().unwrap().remove(key);
    }

    /// Change the spec the way a user would: generation and resource version advance
    pub fn edit_spec(&self, key: &ObjectKey, edit: impl FnOnce(&mut K)) {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(key).expect("object exists");
        edit(object);
        let generation = object.meta().generation.unwrap_or(0) + 1;
        object.meta_mut().generation = Some(generation);
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        object.meta_mut().resource_version = Some(version.to_string());
    }

    /// Reject the next `count` status writes with a conflict
    pub fn fail_next_persists(&self, count: usize) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_unavailable_on_persist(&self, unavailable: bool) {
        self.unavailable_on_persist.store(unavailable, Ordering::SeqCst);
    }

    /// Refuse status writes the way admission or RBAC would
    pub fn set_rejecting_persists(&self, rejecting: bool) {
        self.rejecting_persists.store(rejecting, Ordering::SeqCst);
    }

    /// Number of successful status writes
    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K> RequestStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(self.get(key))
    }

    async fn persist_status(
        &self,
        key: &ObjectKey,
        resource_version: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) || self.unavailable_on_persist.load(Ordering::SeqCst)
        {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        if self.rejecting_persists.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("status: Invalid value".to_string()));
        }
        let injected = self
            .conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Conflict);
        }

        let mut objects = self.objects.lock().unwrap();
        let Some(object) = objects.get_mut(key) else {
            return Err(StoreError::Gone);
        };
        if object.meta().resource_version.as_deref() != Some(resource_version) {
            return Err(StoreError::Conflict);
        }

        let mut value = serde_json::to_value(&*object).unwrap();
        value["status"] = status;
        let mut updated: K = serde_json::from_value(value).unwrap();
        self.bump_version(&mut updated);
        *object = updated;
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type CallHook = Box<dyn FnOnce() + Send>;

/// Analyzer with scripted responses
pub struct FakeAnalyzer {
    calls: AtomicUsize,
    queued: Mutex<VecDeque<Result<Findings, AnalyzerError>>>,
    fallback: Result<Findings, AnalyzerError>,
    delay: Option<Duration>,
    on_call: Mutex<Option<CallHook>>,
}

impl FakeAnalyzer {
    pub fn returning(findings: Findings) -> Self {
        Self::with_fallback(Ok(findings))
    }

    pub fn succeeding(summary: &str) -> Self {
        Self::returning(Findings::summary(summary))
    }

    pub fn failing(error: AnalyzerError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: Result<Findings, AnalyzerError>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            queued: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            on_call: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer the next call with `response` before falling back
    pub fn push(&self, response: Result<Findings, AnalyzerError>) {
        self.queued.lock().unwrap().push_back(response);
    }

    /// Run `hook` during the next call, once
    pub fn on_call(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn analyze(&self, _input: &AnalysisInput) -> Result<Findings, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_call.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queued.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Sink that remembers event and span names
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<String>>,
    spans: Mutex<Vec<String>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn spans(&self) -> Vec<String> {
        self.spans.lock().unwrap().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_event(&self, name: &str, _attributes: Attributes<'_>) {
        self.events.lock().unwrap().push(name.to_string());
    }

    fn start_span(&self, name: &str, _attributes: Attributes<'_>) -> SpanGuard {
        self.spans.lock().unwrap().push(name.to_string());
        SpanGuard::new(Span::none())
    }
}
