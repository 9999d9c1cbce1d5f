use crate::{
    registered_service::{Constraints, HealthCheck},
    Condition, ServiceClassIdentityItem,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const FINALIZER: &str = "serviceclasses.svcbind.io/finalizer";

/// Describes how services of a class are discovered from the resources that
/// implement them. Copied into the service namespaces of the environments
/// its constraints admit.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "svcbind.io",
    version = "v1alpha1",
    kind = "ServiceClass",
    status = "ServiceClassStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClassSpec {
    pub constraints: Option<Constraints>,
    pub health_check: Option<HealthCheck>,
    pub resource: ServiceClassResource,
    #[serde(default)]
    pub service_class_identity: Vec<ServiceClassIdentityItem>,
}

/// The resource kind whose instances are registered as services.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClassResource {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub service_endpoint_definition_mappings: EndpointMappings,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMappings {
    #[serde(default)]
    pub resource_fields: Vec<ResourceFieldMapping>,
    #[serde(default)]
    pub secret_ref_fields: Vec<SecretRefFieldMapping>,
}

/// An endpoint value read from the resource at `jsonPath`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFieldMapping {
    pub name: String,
    pub json_path: String,
    /// Whether the value is kept in a secret rather than inline.
    #[serde(default)]
    pub secret: bool,
}

/// An endpoint value read from a secret the resource refers to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRefFieldMapping {
    pub name: String,
    pub secret_name: FieldValue,
    pub secret_key: FieldValue,
}

/// A value given as a constant or read from the resource.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    pub constant: Option<String>,
    pub json_path: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClassStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ServiceClass {
    pub fn environment_constraints(&self) -> &[String] {
        self.spec
            .constraints
            .as_ref()
            .map(|c| c.environments.as_slice())
            .unwrap_or_default()
    }
}
