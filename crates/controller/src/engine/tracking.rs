//! First-observation bookkeeping for security anomalies
//!
//! Anomalies carry no analysis. The controller records when it first and last
//! saw each generation and seeds the state; everything after that belongs to
//! whoever investigates.

use chrono::{DateTime, Utc};
use kube::Resource;
use tracing::{debug, info, instrument, warn};

use super::store::{ObjectKey, RequestStore, StoreError};
use super::{Engine, Outcome};
use crate::crds::condition::{
    reasons, rfc3339, upsert_condition, ConditionStatus, RequestCondition, READY_CONDITION,
};
use crate::crds::{AISecurityAnomaly, AISecurityAnomalyStatus, AnomalyState};

/// Next status after observing `generation`, or `None` when it was already recorded.
/// An existing state is never changed.
#[must_use]
pub fn observe_anomaly(
    previous: &AISecurityAnomalyStatus,
    generation: i64,
    now: DateTime<Utc>,
) -> Option<AISecurityAnomalyStatus> {
    let has_state = previous
        .state
        .as_deref()
        .is_some_and(|state| !state.trim().is_empty());
    if previous.observed_generation == Some(generation) && has_state {
        return None;
    }

    let timestamp = rfc3339(now);
    let mut next = previous.clone();
    if !has_state {
        next.state = Some(AnomalyState::New.to_string());
    }
    if next.first_observed_at.is_none() {
        next.first_observed_at = Some(timestamp.clone());
    }
    next.last_observed_at = Some(timestamp);
    next.observed_generation = Some(generation);
    upsert_condition(
        &mut next.conditions,
        RequestCondition::new(
            READY_CONDITION,
            ConditionStatus::True,
            reasons::OBSERVED,
            "Anomaly recorded",
            now,
        )
        .with_observed_generation(generation),
    );
    Some(next)
}

impl Engine {
    /// Record the first observation of an anomaly generation
    #[instrument(skip(self, store), fields(namespace = %key.namespace, name = %key.name))]
    pub async fn track_anomaly<S>(&self, store: &S, key: &ObjectKey) -> Outcome
    where
        S: RequestStore<AISecurityAnomaly> + ?Sized,
    {
        let anomaly = match store.fetch(key).await {
            Ok(Some(anomaly)) => anomaly,
            Ok(None) | Err(StoreError::Gone) => return Outcome::Done,
            Err(err) => {
                warn!("Failed to fetch anomaly: {}", err);
                return Outcome::Fatal(err);
            }
        };

        let generation = anomaly.meta().generation.unwrap_or(0);
        let previous = anomaly.status.clone().unwrap_or_default();
        let Some(next) = observe_anomaly(&previous, generation, Utc::now()) else {
            debug!(generation, "Anomaly already observed");
            return Outcome::Done;
        };

        let Some(resource_version) = anomaly.meta().resource_version.clone() else {
            return Outcome::RequeueImmediate;
        };
        let status = match serde_json::to_value(&next) {
            Ok(status) => status,
            Err(err) => {
                warn!("Failed to serialize anomaly status: {}", err);
                return Outcome::Done;
            }
        };

        match store.persist_status(key, &resource_version, status).await {
            Ok(()) => {
                info!(
                    generation,
                    severity = %anomaly.spec.severity,
                    state = next.state.as_deref().unwrap_or_default(),
                    "Anomaly observed"
                );
                self.telemetry.record_event(
                    "anomaly.observed",
                    &[("severity", anomaly.spec.severity.clone())],
                );
                Outcome::Done
            }
            Err(StoreError::Conflict) => Outcome::RequeueImmediate,
            Err(StoreError::Gone) => Outcome::Done,
            Err(StoreError::Rejected(reason)) => {
                warn!(generation, "Anomaly status write rejected: {}", reason);
                Outcome::RequeueAfter(self.settings.backoff.max)
            }
            Err(err) => {
                warn!("Failed to persist anomaly status: {}", err);
                Outcome::Fatal(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::AISecurityAnomalySpec;
    use crate::engine::testing::{MemoryStore, RecordingTelemetry};
    use crate::engine::EngineSettings;
    use crate::registry::{AnalyzerRegistry, RequestKind};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn later() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap()
    }

    fn key() -> ObjectKey {
        ObjectKey::new(RequestKind::SecurityAnomaly, "default", "crypto-miner")
    }

    fn anomaly() -> AISecurityAnomaly {
        let mut anomaly = AISecurityAnomaly::new(
            "crypto-miner",
            AISecurityAnomalySpec {
                description: "Unexpected outbound traffic to mining pool".to_string(),
                severity: "High".to_string(),
                source_component: Some("falco".to_string()),
                affected_resource: Some("pod/cart-0".to_string()),
                anomaly_type: Some("NetworkAnomaly".to_string()),
            },
        );
        anomaly.metadata.namespace = Some("default".to_string());
        anomaly
    }

    #[test]
    fn test_first_observation_seeds_state() {
        let status = observe_anomaly(&AISecurityAnomalyStatus::default(), 1, now()).unwrap();
        assert_eq!(status.state.as_deref(), Some("New"));
        assert_eq!(status.first_observed_at.as_deref(), Some("2025-06-01T12:00:00Z"));
        assert_eq!(status.last_observed_at, status.first_observed_at);
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_observed_generation_is_not_rewritten() {
        let status = observe_anomaly(&AISecurityAnomalyStatus::default(), 1, now()).unwrap();
        assert!(observe_anomaly(&status, 1, later()).is_none());
    }

    #[test]
    fn test_external_state_is_preserved() {
        let mut status = observe_anomaly(&AISecurityAnomalyStatus::default(), 1, now()).unwrap();
        status.state = Some("Investigating".to_string());
        status.assigned_to = Some("oncall".to_string());

        let next = observe_anomaly(&status, 2, later()).unwrap();
        assert_eq!(next.state.as_deref(), Some("Investigating"));
        assert_eq!(next.assigned_to.as_deref(), Some("oncall"));
        assert_eq!(next.first_observed_at.as_deref(), Some("2025-06-01T12:00:00Z"));
        assert_eq!(next.last_observed_at.as_deref(), Some("2025-06-01T13:00:00Z"));
        assert_eq!(next.conditions.len(), 1);
    }

    #[tokio::test]
    async fn test_track_anomaly_records_once() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = Engine::new(AnalyzerRegistry::new(), telemetry.clone(), EngineSettings::default());
        let store = MemoryStore::new();
        store.insert(&key(), anomaly());

        assert_eq!(engine.track_anomaly(&store, &key()).await, Outcome::Done);
        assert_eq!(engine.track_anomaly(&store, &key()).await, Outcome::Done);

        assert_eq!(store.persists(), 1);
        let status = store.get(&key()).unwrap().status.unwrap();
        assert_eq!(status.state.as_deref(), Some("New"));
        assert_eq!(telemetry.events(), vec!["anomaly.observed"]);
    }

    #[tokio::test]
    async fn test_track_anomaly_retries_on_conflict() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = Engine::new(AnalyzerRegistry::new(), telemetry, EngineSettings::default());
        let store = MemoryStore::new();
        store.insert(&key(), anomaly());
        store.fail_next_persists(1);

        assert_eq!(engine.track_anomaly(&store, &key()).await, Outcome::RequeueImmediate);
        assert_eq!(engine.track_anomaly(&store, &key()).await, Outcome::Done);
        assert_eq!(store.persists(), 1);
    }

    #[tokio::test]
    async fn test_track_anomaly_backs_off_when_write_rejected() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let settings = EngineSettings::default();
        let engine = Engine::new(AnalyzerRegistry::new(), telemetry.clone(), settings);
        let store = MemoryStore::new();
        store.insert(&key(), anomaly());
        store.set_rejecting_persists(true);

        assert_eq!(
            engine.track_anomaly(&store, &key()).await,
            Outcome::RequeueAfter(settings.backoff.max)
        );
        assert_eq!(store.persists(), 0);
        assert!(telemetry.events().is_empty());
    }
}
