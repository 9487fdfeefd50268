//! Reconciliation engine
//!
//! One engine serves every analyzer-backed request kind. A pass fetches the
//! object, skips it when its status already answers the current generation,
//! runs the kind's analyzer under a timeout, projects the result into a new
//! status and writes it back conditionally on the resource version it read.
//!
//! Nothing here talks to the cluster directly; reads and writes go through a
//! [`RequestStore`], which keeps the engine testable against an in-memory store.

mod backoff;
pub mod projector;
pub mod store;
mod tracking;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{BackoffPolicy, FailureTracker};
pub use projector::{project, AnalysisStatus, AttemptResult};
pub use store::{KubeStore, ObjectKey, RequestStore, StoreError};
pub use tracking::observe_anomaly;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::analyzers::{AnalysisInput, AnalyzerError};
use crate::registry::{AnalysisRequest, AnalyzerRegistry};
use crate::telemetry::TelemetrySink;

/// Result of one reconciliation pass, interpreted by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the object changes
    Done,
    /// Try again after the delay
    RequeueAfter(Duration),
    /// Try again right away against the latest revision
    RequeueImmediate,
    /// The cluster API could not be reached
    Fatal(StoreError),
}

/// Engine timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub analyzer_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            analyzer_timeout: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// An attempt that could not be persisted, kept for reuse on the next pass
#[derive(Debug, Clone)]
struct PendingResult {
    generation: i64,
    input: Option<AnalysisInput>,
    attempt: AttemptResult,
}

pub struct Engine {
    analyzers: AnalyzerRegistry,
    telemetry: Arc<dyn TelemetrySink>,
    settings: EngineSettings,
    pending: DashMap<ObjectKey, PendingResult>,
    failures: FailureTracker,
}

impl Engine {
    #[must_use]
    pub fn new(
        analyzers: AnalyzerRegistry,
        telemetry: Arc<dyn TelemetrySink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            analyzers,
            telemetry,
            settings,
            pending: DashMap::new(),
            failures: FailureTracker::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Drop all in-memory bookkeeping for a key
    pub fn forget(&self, key: &ObjectKey) {
        self.pending.remove(key);
        self.failures.clear(key);
    }

    /// Reconcile one analyzer-backed request
    #[instrument(skip(self, store), fields(kind = %key.kind, namespace = %key.namespace, name = %key.name))]
    pub async fn reconcile<K, S>(&self, store: &S, key: &ObjectKey) -> Outcome
    where
        K: AnalysisRequest,
        S: RequestStore<K> + ?Sized,
    {
        let object = match store.fetch(key).await {
            Ok(Some(object)) => object,
            Ok(None) | Err(StoreError::Gone) => {
                debug!("Request no longer exists");
                self.forget(key);
                return Outcome::Done;
            }
            Err(err) => {
                warn!("Failed to fetch request: {}", err);
                return Outcome::Fatal(err);
            }
        };

        let generation = object.meta().generation.unwrap_or(0);
        let previous = object.analysis_status();

        if previous.is_settled_for(generation) {
            debug!(generation, "Status already reflects the current spec");
            self.forget(key);
            return Outcome::Done;
        }

        let (attempt, input) = match object.analysis_input() {
            Err(invalid) => {
                warn!(generation, "Rejecting invalid spec: {}", invalid);
                self.telemetry.record_event(
                    "analysis.rejected",
                    &[("kind", key.kind.to_string()), ("reason", invalid.to_string())],
                );
                (AttemptResult::Rejected(invalid.to_string()), None)
            }
            Ok(input) => {
                if let Some(attempt) = self.take_pending(key, generation, &input) {
                    debug!(generation, "Reusing result computed before a write conflict");
                    self.telemetry
                        .record_event("analysis.reused", &[("kind", key.kind.to_string())]);
                    (attempt, Some(input))
                } else {
                    if let Some(wait) = self.failures.remaining(key, generation) {
                        debug!(generation, ?wait, "Retry not due yet");
                        return Outcome::RequeueAfter(wait);
                    }
                    let attempt = self.run_analysis::<K>(key, generation, &input).await;
                    (attempt, Some(input))
                }
            }
        };

        let projected = project(&previous, &attempt, generation, Utc::now());
        if projected == previous {
            debug!(generation, "Projected status unchanged, skipping write");
            return self.settle(key, generation, &attempt);
        }

        let Some(resource_version) = object.meta().resource_version.clone() else {
            warn!("Request has no resourceVersion, refetching");
            return Outcome::RequeueImmediate;
        };

        match store
            .persist_status(key, &resource_version, K::status_patch(&projected))
            .await
        {
            Ok(()) => {
                self.pending.remove(key);
                info!(generation, outcome = attempt_label(&attempt), "Status updated");
                self.settle(key, generation, &attempt)
            }
            Err(StoreError::Conflict) => {
                debug!(generation, "Status write conflicted, retrying against latest revision");
                self.telemetry
                    .record_event("status.conflict", &[("kind", key.kind.to_string())]);
                self.pending.insert(
                    key.clone(),
                    PendingResult {
                        generation,
                        input,
                        attempt,
                    },
                );
                Outcome::RequeueImmediate
            }
            Err(StoreError::Gone) => {
                debug!("Request deleted during analysis, discarding result");
                self.forget(key);
                Outcome::Done
            }
            Err(StoreError::Rejected(reason)) => {
                warn!(generation, "Status write rejected: {}", reason);
                self.telemetry.record_event(
                    "status.rejected",
                    &[("kind", key.kind.to_string()), ("reason", reason)],
                );
                self.pending.remove(key);
                let delay = self
                    .failures
                    .record_failure(key, generation, self.settings.backoff);
                Outcome::RequeueAfter(delay)
            }
            Err(err) => {
                warn!("Failed to persist status: {}", err);
                self.pending.insert(
                    key.clone(),
                    PendingResult {
                        generation,
                        input,
                        attempt,
                    },
                );
                Outcome::Fatal(err)
            }
        }
    }

    /// Take the pending result for the key if it was computed for this generation and input.
    /// Anything else in the slot is stale and dropped.
    fn take_pending(
        &self,
        key: &ObjectKey,
        generation: i64,
        input: &AnalysisInput,
    ) -> Option<AttemptResult> {
        let (_, pending) = self.pending.remove(key)?;
        if pending.generation == generation && pending.input.as_ref() == Some(input) {
            Some(pending.attempt)
        } else {
            debug!(
                pending_generation = pending.generation,
                generation, "Discarding result computed for a superseded spec"
            );
            None
        }
    }

    async fn run_analysis<K: AnalysisRequest>(
        &self,
        key: &ObjectKey,
        generation: i64,
        input: &AnalysisInput,
    ) -> AttemptResult {
        let Some(analyzer) = self.analyzers.analyzer_for(key.kind) else {
            return AttemptResult::Failed(format!("no analyzer backend is configured for {}", key.kind));
        };

        let attributes = [
            ("kind", key.kind.to_string()),
            ("backend", analyzer.name().to_string()),
            ("generation", generation.to_string()),
        ];
        let guard = self.telemetry.start_span("analyzer.analyze", &attributes);
        let span = guard.span().clone();

        debug!(backend = analyzer.name(), subject = %input.subject(), "Invoking analyzer");
        let timeout = self.settings.analyzer_timeout;
        let result = match tokio::time::timeout(timeout, analyzer.analyze(input))
            .instrument(span)
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AnalyzerError::Timeout(timeout)),
        };
        let elapsed = guard.end();

        match result {
            Ok(findings) => {
                self.telemetry.record_event(
                    "analysis.succeeded",
                    &[
                        ("kind", key.kind.to_string()),
                        ("duration_ms", elapsed.as_millis().to_string()),
                    ],
                );
                AttemptResult::Succeeded(K::shape_findings(findings))
            }
            Err(err) => {
                warn!(backend = analyzer.name(), "Analysis failed: {}", err);
                self.telemetry.record_event(
                    "analysis.failed",
                    &[("kind", key.kind.to_string()), ("error", err.to_string())],
                );
                AttemptResult::Failed(err.to_string())
            }
        }
    }

    /// Outcome once the attempt's status is stored
    fn settle(&self, key: &ObjectKey, generation: i64, attempt: &AttemptResult) -> Outcome {
        match attempt {
            AttemptResult::Succeeded(_) | AttemptResult::Rejected(_) => {
                self.failures.clear(key);
                Outcome::Done
            }
            AttemptResult::Failed(_) => {
                let delay = self
                    .failures
                    .record_failure(key, generation, self.settings.backoff);
                debug!(
                    generation,
                    attempts = self.failures.attempts(key),
                    ?delay,
                    "Scheduling retry"
                );
                Outcome::RequeueAfter(delay)
            }
        }
    }
}

fn attempt_label(attempt: &AttemptResult) -> &'static str {
    match attempt {
        AttemptResult::Succeeded(_) => "succeeded",
        AttemptResult::Failed(_) => "failed",
        AttemptResult::Rejected(_) => "rejected",
    }
}
