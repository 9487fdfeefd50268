pub mod condition;
pub mod manifest_analysis;
pub mod network_policy_audit;
pub mod pod_security_assessment;
pub mod secrets_audit;
pub mod security_anomaly;

pub use condition::*;
pub use manifest_analysis::*;
pub use network_policy_audit::*;
pub use pod_security_assessment::*;
pub use secrets_audit::*;
pub use security_anomaly::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Every custom resource definition served by the controller, in install order
#[must_use]
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        AIManifestAnalysis::crd(),
        AINetworkPolicyAudit::crd(),
        AIPodSecurityAssessment::crd(),
        AISecretsAudit::crd(),
        AISecurityAnomaly::crd(),
    ]
}
