use std::sync::Arc;

use kube::Client;
use thiserror::Error;

use crate::analyzers::AnalyzerError;
use crate::engine::{Engine, StoreError};
use crate::tasks::config::ControllerConfig;

/// Shared state handed to every controller
pub struct Context {
    pub client: Client,
    pub engine: Arc<Engine>,
    pub config: Arc<ControllerConfig>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Cluster API unavailable: {0}")]
    RuntimeUnavailable(#[from] StoreError),

    #[error("Object is missing a namespace or name")]
    MissingObjectKey,

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
