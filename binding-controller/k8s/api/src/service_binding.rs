use crate::{labels, Condition};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares that an application consumes the endpoint values stored in a
/// secret. Pushed into application namespaces once a claim is resolved.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "svcbind.io",
    version = "v1alpha1",
    kind = "ServiceBinding",
    status = "ServiceBindingStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingSpec {
    /// Name of the secret holding the endpoint values.
    pub service_endpoint_definition_secret: String,
    pub application: ApplicationSelector,
    #[serde(default)]
    pub envs: Vec<EnvironmentVariable>,
}

/// Selects the workload to bind, either by name or by labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSelector {
    pub api_version: String,
    pub kind: String,
    pub name: Option<String>,
    pub selector: Option<labels::Selector>,
}

/// Projects a secret key into a container environment variable.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EnvironmentVariable {
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingStatus {
    pub state: Option<BindingState>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum BindingState {
    Ready,
    Malformed,
}
