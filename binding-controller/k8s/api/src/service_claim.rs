use crate::{
    service_binding::{ApplicationSelector, EnvironmentVariable},
    Condition, ServiceClassIdentityItem,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const FINALIZER: &str = "serviceclaims.svcbind.io/finalizer";

/// A request for a service with the given identity, scoped to an environment.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "svcbind.io",
    version = "v1alpha1",
    kind = "ServiceClaim",
    status = "ServiceClaimStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClaimSpec {
    pub service_class_identity: Vec<ServiceClassIdentityItem>,
    pub service_endpoint_definition_keys: Vec<String>,
    pub application: Option<ApplicationSelector>,
    pub target: Option<Target>,
    #[serde(default)]
    pub envs: Vec<EnvironmentVariable>,
}

/// Where a claim's binding is delivered. Exactly one field must be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Every application namespace of every environment with this name.
    pub environment_tag: Option<String>,
    /// A single namespace of a single environment.
    pub application_cluster_context: Option<ApplicationClusterContext>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationClusterContext {
    pub cluster_environment_name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClaimStatus {
    pub state: Option<ClaimState>,
    #[serde(rename = "claimID")]
    pub claim_id: Option<String>,
    pub registered_service: Option<RegisteredServiceReference>,
    #[serde(default)]
    pub conditions: Vec<Condition>,

    // Snapshot of the immutable fields, taken when the claim is initialized.
    pub original_service_class_identity: Option<Vec<ServiceClassIdentityItem>>,
    pub original_service_endpoint_definition_keys: Option<Vec<String>>,
    pub original_target: Option<Target>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ClaimState {
    Pending,
    Resolved,
    Invalid,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct RegisteredServiceReference {
    pub name: String,
    pub uid: String,
}

/// Condition types and reasons published on claims.
pub mod conditions {
    pub const VALID: &str = "Valid";
    pub const READY: &str = "Ready";

    pub const VALIDATION_SUCCEEDED: &str = "ValidationSucceeded";
    pub const MISSING_FIELD: &str = "MissingField";
    pub const UPDATED_IMMUTABLE_FIELD: &str = "UpdatedImmutableField";
    pub const NO_MATCHING_SERVICE_FOUND: &str = "NoMatchingServiceFound";
    pub const RESOLVED: &str = "Resolved";
    pub const PROPAGATION_FAILED: &str = "PropagationFailed";
}

// === impl Target ===

impl Target {
    pub fn environment_tag(tag: impl ToString) -> Self {
        Self {
            environment_tag: Some(tag.to_string()),
            application_cluster_context: None,
        }
    }

    pub fn cluster_context(environment: impl ToString, namespace: impl ToString) -> Self {
        Self {
            environment_tag: None,
            application_cluster_context: Some(ApplicationClusterContext {
                cluster_environment_name: environment.to_string(),
                namespace: namespace.to_string(),
            }),
        }
    }

    /// True when exactly one of the environment tag or cluster context is set.
    pub fn is_well_formed(&self) -> bool {
        let tag = self.environment_tag.as_deref().is_some_and(|t| !t.is_empty());
        tag != self.application_cluster_context.is_some()
    }
}

// === impl ServiceClaim ===

impl ServiceClaim {
    pub fn state(&self) -> Option<ClaimState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    pub fn status_mut(&mut self) -> &mut ServiceClaimStatus {
        self.status.get_or_insert_with(Default::default)
    }

    pub fn cluster_context(&self) -> Option<&ApplicationClusterContext> {
        self.spec
            .target
            .as_ref()
            .and_then(|t| t.application_cluster_context.as_ref())
    }

    pub fn environment_tag(&self) -> Option<&str> {
        self.spec
            .target
            .as_ref()
            .and_then(|t| t.environment_tag.as_deref())
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_well_formedness() {
        assert!(Target::environment_tag("prod").is_well_formed());
        assert!(Target::cluster_context("worker", "apps").is_well_formed());
        assert!(!Target::default().is_well_formed());
        assert!(!Target::environment_tag("").is_well_formed());

        let both = Target {
            environment_tag: Some("prod".to_string()),
            ..Target::cluster_context("worker", "apps")
        };
        assert!(!both.is_well_formed());
    }

    #[test]
    fn status_round_trips_with_wire_names() {
        let status = ServiceClaimStatus {
            state: Some(ClaimState::Resolved),
            claim_id: Some("id".to_string()),
            registered_service: Some(RegisteredServiceReference {
                name: "pg".to_string(),
                uid: "uid-1".to_string(),
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["claimID"], "id");
        assert_eq!(value["state"], "Resolved");
        assert_eq!(value["registeredService"]["uid"], "uid-1");
        assert_eq!(serde_json::from_value::<ServiceClaimStatus>(value).unwrap(), status);
    }
}
