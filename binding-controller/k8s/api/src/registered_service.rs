use crate::{Condition, ServiceClassIdentityItem};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const FINALIZER: &str = "registeredservices.svcbind.io/finalizer";

/// A service offered for claiming, with the values needed to reach it.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "svcbind.io",
    version = "v1alpha1",
    kind = "RegisteredService",
    status = "RegisteredServiceStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredServiceSpec {
    pub service_class_identity: Vec<ServiceClassIdentityItem>,
    #[serde(default)]
    pub service_endpoint_definition: Vec<ServiceEndpointDefinitionItem>,
    pub constraints: Option<Constraints>,
    pub health_check: Option<HealthCheck>,
    pub sla: Option<String>,
}

/// A named endpoint value, given inline or read from a secret.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpointDefinitionItem {
    pub name: String,
    pub value: Option<String>,
    pub value_from_secret: Option<SecretKeyReference>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SecretKeyReference {
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Constraints {
    /// Environment tags, optionally negated with `!`.
    #[serde(default)]
    pub environments: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct HealthCheck {
    pub container: HealthCheckContainer,
}

/// A container run periodically to check the service.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct HealthCheckContainer {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    /// Interval between runs.
    pub minutes: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredServiceStatus {
    pub state: Option<ServiceState>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ServiceState {
    Available,
    Claimed,
    Unreachable,
    Unknown,
}

// === impl RegisteredService ===

impl RegisteredService {
    pub fn state(&self) -> Option<ServiceState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    pub fn is_available(&self) -> bool {
        self.state() == Some(ServiceState::Available)
    }

    pub fn environment_constraints(&self) -> &[String] {
        self.spec
            .constraints
            .as_ref()
            .map(|c| c.environments.as_slice())
            .unwrap_or_default()
    }

    /// Names of all endpoint values the service offers.
    pub fn endpoint_keys(&self) -> Vec<String> {
        self.spec
            .service_endpoint_definition
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn set_state(&mut self, state: ServiceState) {
        self.status.get_or_insert_with(Default::default).state = Some(state);
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
