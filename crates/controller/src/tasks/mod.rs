use crate::crds::{
    AIManifestAnalysis, AINetworkPolicyAudit, AIPodSecurityAssessment, AISecretsAudit,
    AISecurityAnomaly,
};
use crate::engine::{KubeStore, ObjectKey, Outcome};
use crate::registry::{AnalysisRequest, RequestKind};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::api::DynamicObject;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, Instrument};

pub mod config;
pub mod types;

pub use config::ControllerConfig;
pub use types::{Context, Error, Result};

/// Run one controller per request kind until they all stop
#[instrument(skip(context), fields(namespace = context.config.watch_namespace().unwrap_or("*")))]
pub async fn run_analysis_controllers(context: Arc<Context>) -> Result<()> {
    info!("Starting analysis controllers");

    let (manifests, network, pods, secrets, anomalies) = tokio::join!(
        run_request_controller::<AIManifestAnalysis>(context.clone()),
        run_request_controller::<AINetworkPolicyAudit>(context.clone()),
        run_request_controller::<AIPodSecurityAssessment>(context.clone()),
        run_request_controller::<AISecretsAudit>(context.clone()),
        run_anomaly_controller(context.clone()),
    );

    for (kind, result) in [
        (RequestKind::ManifestAnalysis, manifests),
        (RequestKind::NetworkPolicyAudit, network),
        (RequestKind::PodSecurityAssessment, pods),
        (RequestKind::SecretsAudit, secrets),
        (RequestKind::SecurityAnomaly, anomalies),
    ] {
        if let Err(e) = result {
            error!("{} controller failed: {:?}", kind, e);
        }
    }

    info!("Analysis controllers shutting down");
    Ok(())
}

fn watched_api<K>(context: &Context) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match context.config.watch_namespace() {
        Some(namespace) => Api::namespaced(context.client.clone(), namespace),
        None => Api::all(context.client.clone()),
    }
}

type ReconcileFn<K> = fn(Arc<K>, Arc<Context>) -> BoxFuture<'static, Result<Action>>;

async fn drive<K>(api: Api<K>, kind: RequestKind, context: Arc<Context>, reconcile: ReconcileFn<K>)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let engine = context.engine.clone();
    Controller::new(api, Config::default().any_semantic())
        .run(reconcile, error_policy::<K>, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("reconciliation_result", kind = %kind);
            // Deleted objects never reach the reconciler again, so their bookkeeping goes here
            if let Err(controller::Error::ObjectNotFound(object)) = &reconciliation_result {
                if let Some(key) = missing_object_key(kind, object) {
                    engine.forget(&key);
                }
            }
            async move {
                match reconciliation_result {
                    Ok((object, _)) => debug!(object = %object.name, "Reconciliation finished"),
                    Err(e) => debug!(error = %e, "Reconciliation error"),
                }
            }
            .instrument(span)
        })
        .await;
}

async fn run_request_controller<K: AnalysisRequest>(context: Arc<Context>) -> Result<()> {
    info!("Starting {} controller", K::KIND);
    let api = watched_api::<K>(&context);
    drive(api, K::KIND, context, |request, ctx| {
        reconcile_request(request, ctx).boxed()
    })
    .await;
    info!("{} controller stopped", K::KIND);
    Ok(())
}

async fn run_anomaly_controller(context: Arc<Context>) -> Result<()> {
    info!("Starting {} controller", RequestKind::SecurityAnomaly);
    let api = watched_api::<AISecurityAnomaly>(&context);
    drive(api, RequestKind::SecurityAnomaly, context, |anomaly, ctx| {
        reconcile_anomaly(anomaly, ctx).boxed()
    })
    .await;
    info!("{} controller stopped", RequestKind::SecurityAnomaly);
    Ok(())
}

fn object_key<K: Resource>(kind: RequestKind, object: &K) -> Result<ObjectKey> {
    ObjectKey::for_resource(kind, object).ok_or(Error::MissingObjectKey)
}

fn missing_object_key(kind: RequestKind, object: &ObjectRef<DynamicObject>) -> Option<ObjectKey> {
    let namespace = object.namespace.clone()?;
    Some(ObjectKey::new(kind, namespace, object.name.clone()))
}

/// Map an engine outcome onto the controller runtime's requeue decision
fn outcome_to_action(outcome: Outcome) -> Result<Action> {
    match outcome {
        Outcome::Done => Ok(Action::await_change()),
        Outcome::RequeueAfter(delay) => Ok(Action::requeue(delay)),
        Outcome::RequeueImmediate => Ok(Action::requeue(Duration::ZERO)),
        Outcome::Fatal(err) => Err(Error::RuntimeUnavailable(err)),
    }
}

#[instrument(skip(request, context), fields(kind = %K::KIND, name = %request.name_any(), namespace = ?request.namespace()))]
async fn reconcile_request<K: AnalysisRequest>(
    request: Arc<K>,
    context: Arc<Context>,
) -> Result<Action> {
    let key = object_key(K::KIND, request.as_ref())?;
    let store = KubeStore::<K>::new(context.client.clone());
    let outcome = context.engine.reconcile::<K, _>(&store, &key).await;
    debug!(?outcome, "Reconcile pass finished");
    outcome_to_action(outcome)
}

#[instrument(skip(anomaly, context), fields(name = %anomaly.name_any(), namespace = ?anomaly.namespace()))]
async fn reconcile_anomaly(anomaly: Arc<AISecurityAnomaly>, context: Arc<Context>) -> Result<Action> {
    let key = object_key(RequestKind::SecurityAnomaly, anomaly.as_ref())?;
    let store = KubeStore::<AISecurityAnomaly>::new(context.client.clone());
    outcome_to_action(context.engine.track_anomaly(&store, &key).await)
}

/// Only cluster API failures reach here; analyzer failures are requeued by the engine itself
fn error_policy<K: Resource>(object: Arc<K>, err: &Error, context: Arc<Context>) -> Action {
    let retry = context.config.analysis.fatal_retry();
    error!(
        error = ?err,
        name = %object.name_any(),
        retry_seconds = retry.as_secs(),
        "Reconciliation failed"
    );
    Action::requeue(retry)
}
