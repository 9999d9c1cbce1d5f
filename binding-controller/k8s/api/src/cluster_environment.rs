use crate::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const FINALIZER: &str = "clusterenvironments.svcbind.io/finalizer";

/// A worker cluster, reachable through the credentials stored in a secret.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "svcbind.io",
    version = "v1alpha1",
    kind = "ClusterEnvironment",
    status = "ClusterEnvironmentStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEnvironmentSpec {
    /// The environment tag claims and service constraints are matched against.
    pub environment_name: String,
    /// Secret holding the access configuration for the cluster.
    pub cluster_context_secret: String,
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub application_namespaces: Vec<String>,
    #[serde(default)]
    pub service_namespaces: Vec<String>,
    pub contact_info: Option<String>,
    pub synchronization_strategy: Option<SynchronizationStrategy>,
}

/// How remote records reach the control plane.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum SynchronizationStrategy {
    /// The control plane watches the worker cluster.
    #[default]
    Pull,
    /// Agents in the worker cluster write to the control plane.
    Push,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEnvironmentStatus {
    pub state: Option<EnvironmentState>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum EnvironmentState {
    Online,
    Partial,
    Offline,
}

/// Condition types published on environments.
pub mod conditions {
    pub const ONLINE: &str = "Online";
    pub const APPLICATION_PERMISSIONS: &str = "ApplicationNamespacePermissionsRequired";
    pub const SERVICE_PERMISSIONS: &str = "ServiceNamespacePermissionsRequired";

    pub const CONNECTION_SUCCESSFUL: &str = "ConnectionSuccessful";
    pub const CONNECTION_ERROR: &str = "ConnectionError";
    pub const CLIENT_CREATION_ERROR: &str = "ClientCreationError";
    pub const PERMISSIONS_GRANTED: &str = "PermissionsGranted";
    pub const PERMISSIONS_NOT_GRANTED: &str = "PermissionsNotGranted";
}

// === impl ClusterEnvironment ===

impl ClusterEnvironment {
    pub fn synchronization_strategy(&self) -> SynchronizationStrategy {
        self.spec.synchronization_strategy.unwrap_or_default()
    }

    pub fn state(&self) -> Option<EnvironmentState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    pub fn status_mut(&mut self) -> &mut ClusterEnvironmentStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
