//! Delivery of bindings, secrets, catalogs and service classes into worker
//! clusters.
//!
//! Every push is an idempotent create-or-update keyed by name and namespace.
//! Independent targets are always all attempted; their failures are joined
//! into a single error.

use crate::{error::join, Error, Result};
use binding_controller_k8s_api::{
    labels, service_claim::Target, ByteString, ClusterEnvironment, ObjectMeta, OwnerReference,
    Resource, ResourceExt, Secret, ServiceBinding, ServiceBindingSpec, ServiceCatalog,
    ServiceClaim, ServiceClass,
};
use binding_controller_k8s_store::{create_or_update, delete_if_exists, Cluster, Connect, Store};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// An environment and the application namespaces to deliver into.
#[derive(Clone, Debug)]
pub(crate) struct Destination {
    pub environment: ClusterEnvironment,
    pub namespaces: Vec<String>,
}

/// Resolves a claim target to its destinations.
///
/// A cluster context names a single namespace of a single environment. An
/// environment tag selects every application namespace of every environment
/// with that name. Environments that do not exist are skipped.
pub(crate) async fn destinations<S: Store>(
    store: &S,
    namespace: &str,
    target: &Target,
) -> Result<Vec<Destination>> {
    if let Some(ctx) = &target.application_cluster_context {
        let env = store
            .get::<ClusterEnvironment>(namespace, &ctx.cluster_environment_name)
            .await?;
        return Ok(env
            .map(|environment| Destination {
                environment,
                namespaces: vec![ctx.namespace.clone()],
            })
            .into_iter()
            .collect());
    }

    let Some(tag) = target.environment_tag.as_deref() else {
        return Ok(vec![]);
    };
    let envs = store.list::<ClusterEnvironment>(namespace, None).await?;
    Ok(envs
        .into_iter()
        .filter(|env| env.spec.environment_name == tag)
        .map(|environment| Destination {
            namespaces: environment.spec.application_namespaces.clone(),
            environment,
        })
        .collect())
}

pub(crate) async fn connect<C: Connect>(
    connector: &C,
    environment: &ClusterEnvironment,
) -> Result<C::Cluster> {
    let namespace = environment.namespace().unwrap_or_default();
    let cluster = connector
        .connect(&namespace, &environment.spec.cluster_context_secret)
        .await?;
    Ok(cluster)
}

/// Delivers a resolved claim to every destination of its target.
pub(crate) async fn propagate<S: Store, C: Connect>(
    store: &S,
    connector: &C,
    claim: &ServiceClaim,
    payload: &BTreeMap<String, String>,
) -> Result<()> {
    let namespace = claim.namespace().unwrap_or_default();
    let target = claim.spec.target.clone().unwrap_or_default();

    let mut errors = vec![];
    for dst in destinations(store, &namespace, &target).await? {
        if let Err(error) = push_bindings(connector, &dst.environment, &dst.namespaces, claim, payload).await {
            errors.push(error);
        }
    }
    join(errors)
}

/// Removes a claim's bindings from every destination of `target`.
pub(crate) async fn retract<S: Store, C: Connect>(
    store: &S,
    connector: &C,
    namespace: &str,
    name: &str,
    target: &Target,
) -> Result<()> {
    let mut errors = vec![];
    for dst in destinations(store, namespace, target).await? {
        if let Err(error) = retract_bindings(connector, &dst.environment, &dst.namespaces, name).await {
            errors.push(error);
        }
    }
    join(errors)
}

pub(crate) async fn push_bindings<C: Connect>(
    connector: &C,
    environment: &ClusterEnvironment,
    namespaces: &[String],
    claim: &ServiceClaim,
    payload: &BTreeMap<String, String>,
) -> Result<()> {
    let cluster = connect(connector, environment).await?;
    let mut errors = vec![];
    for ns in namespaces {
        if let Err(error) = push_binding(&cluster, ns, claim, payload).await {
            warn!(environment = %environment.name_any(), namespace = %ns, %error, "Failed to push service binding");
            errors.push(error);
        }
    }
    join(errors)
}

pub(crate) async fn retract_bindings<C: Connect>(
    connector: &C,
    environment: &ClusterEnvironment,
    namespaces: &[String],
    name: &str,
) -> Result<()> {
    let cluster = connect(connector, environment).await?;
    let mut errors = vec![];
    for ns in namespaces {
        if let Err(error) = retract_binding(&cluster, ns, name).await {
            warn!(environment = %environment.name_any(), namespace = %ns, %error, "Failed to delete service binding");
            errors.push(error);
        }
    }
    join(errors)
}

pub(crate) async fn push_catalogs<C: Connect>(
    connector: &C,
    environment: &ClusterEnvironment,
    namespaces: &[String],
    catalog: &ServiceCatalog,
) -> Result<()> {
    let cluster = connect(connector, environment).await?;
    let mut errors = vec![];
    for ns in namespaces {
        if let Err(error) = push_catalog(&cluster, ns, catalog).await {
            warn!(environment = %environment.name_any(), namespace = %ns, %error, "Failed to push service catalog");
            errors.push(error);
        }
    }
    join(errors)
}

/// Writes the binding for `claim` and the secret it reads into `namespace`.
///
/// The secret is owned by the binding so that deleting the binding removes
/// it as well.
pub(crate) async fn push_binding<K: Cluster>(
    cluster: &K,
    namespace: &str,
    claim: &ServiceClaim,
    payload: &BTreeMap<String, String>,
) -> Result<()> {
    let name = claim.name_any();

    let binding = ServiceBinding {
        metadata: managed_meta(namespace, &name),
        spec: ServiceBindingSpec {
            service_endpoint_definition_secret: name.clone(),
            application: claim.spec.application.clone().unwrap_or_default(),
            envs: claim.spec.envs.clone(),
        },
        status: None,
    };
    let binding = create_or_update(cluster, binding, |current, desired| {
        current.spec = desired.spec;
    })
    .await?;
    let uid = binding
        .uid()
        .ok_or_else(|| Error::Invalid(format!("service binding {namespace}/{name} has no uid")))?;

    let mut meta = managed_meta(namespace, &name);
    meta.owner_references = Some(vec![OwnerReference {
        api_version: ServiceBinding::api_version(&()).to_string(),
        kind: ServiceBinding::kind(&()).to_string(),
        name: name.clone(),
        uid,
        ..Default::default()
    }]);
    let secret = Secret {
        metadata: meta,
        data: Some(
            payload
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    };
    create_or_update(cluster, secret, |current, desired| {
        current.metadata.owner_references = desired.metadata.owner_references;
        current.data = desired.data;
        current.string_data = None;
    })
    .await?;

    debug!(%namespace, %name, "Pushed service binding");
    Ok(())
}

pub(crate) async fn retract_binding<K: Cluster>(cluster: &K, namespace: &str, name: &str) -> Result<()> {
    delete_if_exists::<_, ServiceBinding>(cluster, namespace, name).await?;
    delete_if_exists::<_, Secret>(cluster, namespace, name).await?;
    debug!(%namespace, %name, "Deleted service binding");
    Ok(())
}

pub(crate) async fn push_catalog<K: Cluster>(
    cluster: &K,
    namespace: &str,
    catalog: &ServiceCatalog,
) -> Result<()> {
    let remote = ServiceCatalog {
        metadata: managed_meta(namespace, &catalog.name_any()),
        spec: catalog.spec.clone(),
    };
    create_or_update(cluster, remote, |current, desired| {
        current.spec = desired.spec;
    })
    .await?;
    Ok(())
}

/// Copies `class` into each of `namespaces`.
pub(crate) async fn push_service_class<K: Cluster>(
    cluster: &K,
    namespaces: &[String],
    class: &ServiceClass,
) -> Result<()> {
    let name = class.name_any();
    let mut errors: Vec<Error> = vec![];
    for ns in namespaces {
        let remote = ServiceClass {
            metadata: managed_meta(ns, &name),
            spec: class.spec.clone(),
            status: None,
        };
        let pushed = create_or_update(cluster, remote, |current, desired| {
            current.spec = desired.spec;
        })
        .await;
        match pushed {
            Ok(_) => debug!(namespace = %ns, %name, "Pushed service class"),
            Err(error) => {
                warn!(namespace = %ns, %name, %error, "Failed to push service class");
                errors.push(error.into());
            }
        }
    }
    join(errors)
}

/// Deletes the copies of the service class `name` from `namespaces`.
pub(crate) async fn retract_service_class<K: Cluster>(
    cluster: &K,
    namespaces: &[String],
    name: &str,
) -> Result<()> {
    let mut errors: Vec<Error> = vec![];
    for ns in namespaces {
        match delete_if_exists::<_, ServiceClass>(cluster, ns, name).await {
            Ok(_) => debug!(namespace = %ns, %name, "Deleted service class"),
            Err(error) => errors.push(error.into()),
        }
    }
    join(errors)
}

fn managed_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        labels: Some(
            [(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }
}
