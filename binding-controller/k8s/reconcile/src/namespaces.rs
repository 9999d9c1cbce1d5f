//! Binding of worker namespaces to an environment.
//!
//! A bound namespace has an access grant in the control plane, a RoleBinding
//! labeled with the environment and namespace it authorizes, and an agent
//! running in the worker namespace. The access grants are the record of which
//! namespaces are bound: unbinding compares them against the namespaces the
//! environment currently declares.

use crate::{agent, error::join, AgentImages, Error, NamespaceKind, Result};
use binding_controller_k8s_api::{
    api::rbac::v1::{RoleRef, Subject},
    labels, ClusterEnvironment, ObjectMeta, ResourceExt, RoleBinding,
};
use binding_controller_k8s_store::{delete_if_exists, Cluster, Store};
use std::collections::BTreeSet;
use tracing::{info, warn};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Grants access to and starts agents in each of `namespaces`.
pub(crate) async fn bind<S: Store, K: Cluster>(
    store: &S,
    cluster: &K,
    environment: &ClusterEnvironment,
    kind: NamespaceKind,
    namespaces: &[String],
    images: &AgentImages,
) -> Result<()> {
    let mut errors = vec![];
    for ns in namespaces {
        let bound = async {
            grant(store, environment, kind, ns).await?;
            agent::push(cluster, ns, kind, environment, images.get(kind)).await
        };
        if let Err(error) = bound.await {
            warn!(environment = %environment.name_any(), namespace = %ns, %kind, %error, "Failed to bind namespace");
            errors.push(error);
        }
    }
    join(errors)
}

/// Unbinds the namespaces that hold an access grant but are not in
/// `declared`.
///
/// Agents are only removed when the worker cluster can be reached.
pub(crate) async fn unbind<S: Store, K: Cluster>(
    store: &S,
    cluster: Option<&K>,
    environment: &ClusterEnvironment,
    kind: NamespaceKind,
    declared: &[String],
) -> Result<()> {
    let declared = declared.iter().map(String::as_str).collect::<BTreeSet<_>>();
    let orphans = authorized(store, environment, kind)
        .await?
        .into_iter()
        .filter(|ns| !declared.contains(ns.as_str()))
        .collect::<Vec<_>>();

    let namespace = environment.namespace().unwrap_or_default();
    let env_name = environment.name_any();
    let mut errors = vec![];
    for ns in orphans {
        let name = grant_name(kind, &env_name, &ns);
        if let Err(error) = delete_if_exists::<_, RoleBinding>(store, &namespace, &name).await {
            errors.push(Error::from(error));
        }
        if let Some(cluster) = cluster {
            if let Err(error) = agent::delete(cluster, &ns, kind).await {
                errors.push(error);
            }
        }
        info!(environment = %env_name, namespace = %ns, %kind, "Unbound namespace");
    }
    join(errors)
}

/// Lists the namespaces that currently hold an access grant.
pub(crate) async fn authorized<S: Store>(
    store: &S,
    environment: &ClusterEnvironment,
    kind: NamespaceKind,
) -> Result<Vec<String>> {
    let namespace = environment.namespace().unwrap_or_default();
    let env_name = environment.name_any();
    let selector = labels::selector_string([
        (labels::MANAGED_BY, labels::MANAGED_BY_VALUE),
        (labels::CLUSTER_ENVIRONMENT, env_name.as_str()),
        (labels::NAMESPACE_TYPE, kind.as_str()),
    ]);
    let grants = store
        .list::<RoleBinding>(&namespace, Some(&selector))
        .await?;
    Ok(grants
        .iter()
        .filter_map(|rb| rb.labels().get(labels::NAMESPACE).cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

async fn grant<S: Store>(
    store: &S,
    environment: &ClusterEnvironment,
    kind: NamespaceKind,
    target: &str,
) -> Result<()> {
    let namespace = environment.namespace().unwrap_or_default();
    let env_name = environment.name_any();
    let binding = RoleBinding {
        metadata: ObjectMeta {
            namespace: Some(namespace.clone()),
            name: Some(grant_name(kind, &env_name, target)),
            labels: Some(
                [
                    (labels::MANAGED_BY, labels::MANAGED_BY_VALUE),
                    (labels::CLUSTER_ENVIRONMENT, env_name.as_str()),
                    (labels::NAMESPACE_TYPE, kind.as_str()),
                    (labels::NAMESPACE, target),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "Role".to_string(),
            name: kind.role().to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: None,
            kind: "ServiceAccount".to_string(),
            name: kind.service_account_name(&env_name, target),
            namespace: Some(namespace),
        }]),
    };
    match store.create(&binding).await {
        Ok(_) => Ok(()),
        Err(error) if error.is_already_exists() => Ok(()),
        Err(error) => Err(error.into()),
    }
}

fn grant_name(kind: NamespaceKind, environment: &str, namespace: &str) -> String {
    format!("{}-{environment}-{namespace}", kind.role())
}
