//! Fetch/persist boundary between the engine and the cluster

use std::fmt;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use crate::registry::RequestKind;

/// Identity of a request object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: RequestKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(kind: RequestKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object, `None` when it has no namespace
    #[must_use]
    pub fn for_resource<K: Resource>(kind: RequestKind, object: &K) -> Option<Self> {
        Some(Self::new(kind, object.namespace()?, object.name_any()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Persistence failures as seen by the engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object changed since it was fetched
    #[error("object was modified concurrently")]
    Conflict,

    #[error("object no longer exists")]
    Gone,

    #[error("cluster API unavailable: {0}")]
    Unavailable(String),

    /// The API server refused the request itself, e.g. validation or RBAC
    #[error("request rejected by the cluster API: {0}")]
    Rejected(String),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 409 => StoreError::Conflict,
            kube::Error::Api(response) if response.code == 404 => StoreError::Gone,
            kube::Error::Api(response) if response.code == 429 || response.code >= 500 => {
                StoreError::Unavailable(response.to_string())
            }
            kube::Error::Api(response) => StoreError::Rejected(response.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Conditional read/write access to request objects
#[async_trait]
pub trait RequestStore<K>: Send + Sync {
    /// Current object, `None` when it does not exist
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    /// Replace the status block, failing with `Conflict` when the stored
    /// resource version differs from `resource_version`
    async fn persist_status(
        &self,
        key: &ObjectKey,
        resource_version: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError>;
}

/// Store backed by the Kubernetes API, writing through the status subresource
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> RequestStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn persist_status(
        &self,
        key: &ObjectKey,
        resource_version: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        // resourceVersion in a merge patch makes the API server reject stale writes with 409
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
