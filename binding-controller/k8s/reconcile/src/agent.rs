//! Agent workloads pushed into bound worker namespaces.

use crate::{error::join, Error, Result};
use binding_controller_k8s_api::{
    api::{
        apps::v1::DeploymentSpec,
        core::v1::{ConfigMapEnvSource, Container, EnvFromSource, PodSpec, PodTemplateSpec},
    },
    labels, ClusterEnvironment, ConfigMap, Deployment, ObjectMeta, ResourceExt,
};
use binding_controller_k8s_store::{delete_if_exists, Cluster, Object};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;
use tracing::debug;

/// The role a worker namespace plays for an environment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Hosts applications that claim services.
    Application,
    /// Hosts services registered with the control plane.
    Service,
}

/// Images of the agents run in worker namespaces.
#[derive(Clone, Debug, Default)]
pub struct AgentImages {
    pub application: String,
    pub service: String,
}

// === impl NamespaceKind ===

impl NamespaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Service => "service",
        }
    }

    fn short(&self) -> &'static str {
        match self {
            Self::Application => "app",
            Self::Service => "svc",
        }
    }

    /// The control-plane role granted to the namespace's agent.
    pub fn role(&self) -> &'static str {
        match self {
            Self::Application => "binding-claimer",
            Self::Service => "binding-reporter",
        }
    }

    pub fn deployment_name(&self) -> String {
        format!("binding-{}-agent", self.short())
    }

    pub fn config_map_name(&self) -> String {
        format!("binding-{}-agent-config", self.short())
    }

    /// The identity the agent presents to the control plane.
    pub fn service_account_name(&self, environment: &str, namespace: &str) -> String {
        format!("binding-{}-{environment}-{namespace}", self.short())
    }
}

impl std::fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl AgentImages ===

impl AgentImages {
    pub fn get(&self, kind: NamespaceKind) -> &str {
        match kind {
            NamespaceKind::Application => &self.application,
            NamespaceKind::Service => &self.service,
        }
    }
}

/// Creates the agent's configuration and deployment in `namespace`. Existing
/// records are left as they are.
pub(crate) async fn push<K: Cluster>(
    cluster: &K,
    namespace: &str,
    kind: NamespaceKind,
    environment: &ClusterEnvironment,
    image: &str,
) -> Result<()> {
    let env_name = environment.name_any();
    let mut errors = vec![];
    if let Err(error) = create(cluster, &config_map(namespace, kind, environment)).await {
        errors.push(error);
    }
    if let Err(error) = create(cluster, &deployment(namespace, kind, &env_name, image)).await {
        errors.push(error);
    }
    join(errors)
}

/// Deletes the agent from `namespace`, if present.
pub(crate) async fn delete<K: Cluster>(cluster: &K, namespace: &str, kind: NamespaceKind) -> Result<()> {
    let mut errors = vec![];
    if let Err(error) = delete_if_exists::<_, Deployment>(cluster, namespace, &kind.deployment_name()).await {
        errors.push(Error::from(error));
    }
    if let Err(error) = delete_if_exists::<_, ConfigMap>(cluster, namespace, &kind.config_map_name()).await {
        errors.push(Error::from(error));
    }
    join(errors)
}

async fn create<K, R>(cluster: &K, obj: &R) -> Result<()>
where
    K: Cluster,
    R: Object,
{
    match cluster.create(obj).await {
        Ok(_) => {
            debug!(name = %obj.name_any(), "Created agent resource");
            Ok(())
        }
        Err(error) if error.is_already_exists() => Ok(()),
        Err(error) => Err(error.into()),
    }
}

fn agent_labels(kind: NamespaceKind, environment: &str) -> BTreeMap<String, String> {
    [
        ("app.kubernetes.io/name".to_string(), kind.deployment_name()),
        (labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string()),
        (labels::CLUSTER_ENVIRONMENT.to_string(), environment.to_string()),
    ]
    .into_iter()
    .collect()
}

fn config_map(namespace: &str, kind: NamespaceKind, environment: &ClusterEnvironment) -> ConfigMap {
    let env_name = environment.name_any();
    let data = [
        (
            "control-plane-namespace".to_string(),
            environment.namespace().unwrap_or_default(),
        ),
        ("cluster-environment".to_string(), env_name.clone()),
        (
            "synchronization-strategy".to_string(),
            format!("{:?}", environment.synchronization_strategy()),
        ),
    ];
    ConfigMap {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(kind.config_map_name()),
            labels: Some(agent_labels(kind, &env_name)),
            ..Default::default()
        },
        data: Some(data.into_iter().collect()),
        ..Default::default()
    }
}

fn deployment(namespace: &str, kind: NamespaceKind, environment: &str, image: &str) -> Deployment {
    let labels = agent_labels(kind, environment);
    let selector = [("app.kubernetes.io/name".to_string(), kind.deployment_name())]
        .into_iter()
        .collect::<BTreeMap<_, _>>();
    Deployment {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(kind.deployment_name()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(kind.deployment_name()),
                    containers: vec![Container {
                        name: "agent".to_string(),
                        image: Some(image.to_string()),
                        env_from: Some(vec![EnvFromSource {
                            config_map_ref: Some(ConfigMapEnvSource {
                                name: kind.config_map_name(),
                                optional: Some(false),
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        let kind = NamespaceKind::Application;
        assert_eq!(kind.deployment_name(), "binding-app-agent");
        assert_eq!(kind.config_map_name(), "binding-app-agent-config");
        assert_eq!(kind.role(), "binding-claimer");
        assert_eq!(
            NamespaceKind::Service.service_account_name("worker", "services"),
            "binding-svc-worker-services"
        );
    }
}
