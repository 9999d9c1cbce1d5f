//! Service catalogs list the services each environment may claim.
//!
//! There is one catalog per environment name in a namespace. A service is
//! listed while it is available and its environment constraints admit the
//! catalog's environment.

use crate::{error::join, propagate, Result};
use binding_controller_core::envtag;
use binding_controller_k8s_api::{
    finalizer, service_catalog::ServiceCatalogService, ClusterEnvironment, ObjectMeta,
    RegisteredService, ResourceExt, ServiceCatalog, ServiceCatalogSpec,
};
use binding_controller_k8s_store::{create_or_update, delete_if_exists, Connect, Store};
use tracing::{debug, info};

/// Pushes catalogs into the application namespaces of their environments.
#[derive(Clone)]
pub struct CatalogReconciler<S, C> {
    store: S,
    connector: C,
}

pub(crate) fn entry(service: &RegisteredService) -> ServiceCatalogService {
    ServiceCatalogService {
        name: service.name_any(),
        service_class_identity: service.spec.service_class_identity.clone(),
        service_endpoint_definition_keys: service.endpoint_keys(),
    }
}

fn admits(service: &RegisteredService, environment: &str) -> bool {
    service.is_available() && envtag::matches(environment, service.environment_constraints())
}

/// Builds the catalog for `environment` from the services of a namespace.
pub(crate) fn build(environment: &str, services: &[RegisteredService]) -> ServiceCatalogSpec {
    ServiceCatalogSpec {
        services: services
            .iter()
            .filter(|s| admits(s, environment))
            .map(entry)
            .collect(),
    }
}

/// Creates or refreshes the catalog for `environment` in `namespace`.
pub(crate) async fn ensure<S: Store>(
    store: &S,
    namespace: &str,
    environment: &str,
) -> Result<ServiceCatalog> {
    let services = store.list::<RegisteredService>(namespace, None).await?;
    let catalog = ServiceCatalog {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(environment.to_string()),
            ..Default::default()
        },
        spec: build(environment, &services),
    };
    let catalog = create_or_update(store, catalog, |current, desired| {
        current.spec = desired.spec;
    })
    .await?;
    Ok(catalog)
}

/// Adds or removes `service` in every catalog of its namespace. Returns the
/// catalogs that changed.
pub(crate) async fn update_service<S: Store>(
    store: &S,
    service: &RegisteredService,
) -> Result<Vec<ServiceCatalog>> {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();

    let mut updated = vec![];
    for mut catalog in store.list::<ServiceCatalog>(&namespace, None).await? {
        let environment = catalog.name_any();
        let changed = if admits(service, &environment) {
            catalog.spec.upsert(entry(service))
        } else {
            catalog.spec.remove(&name)
        };
        if changed {
            debug!(%namespace, service = %name, catalog = %environment, "Updating catalog");
            updated.push(store.replace(&catalog).await?);
        }
    }
    Ok(updated)
}

/// Removes the service `name` from every catalog in `namespace`.
pub(crate) async fn remove_service<S: Store>(store: &S, namespace: &str, name: &str) -> Result<Vec<ServiceCatalog>> {
    let mut updated = vec![];
    for mut catalog in store.list::<ServiceCatalog>(namespace, None).await? {
        if catalog.spec.remove(name) {
            updated.push(store.replace(&catalog).await?);
        }
    }
    Ok(updated)
}

/// Deletes the catalog for `environment` unless another live environment
/// still uses it.
pub(crate) async fn release<S: Store>(store: &S, owner: &ClusterEnvironment) -> Result<()> {
    let namespace = owner.namespace().unwrap_or_default();
    let environment = &owner.spec.environment_name;
    let in_use = store
        .list::<ClusterEnvironment>(&namespace, None)
        .await?
        .iter()
        .any(|env| {
            env.name_any() != owner.name_any()
                && !finalizer::is_deleting(env)
                && env.spec.environment_name == *environment
        });
    if in_use {
        debug!(%namespace, %environment, "Catalog still in use");
        return Ok(());
    }
    if delete_if_exists::<_, ServiceCatalog>(store, &namespace, environment).await? {
        info!(%namespace, %environment, "Deleted service catalog");
    }
    Ok(())
}

// === impl CatalogReconciler ===

impl<S: Store, C: Connect> CatalogReconciler<S, C> {
    pub fn new(store: S, connector: C) -> Self {
        Self { store, connector }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(catalog) = self.store.get::<ServiceCatalog>(namespace, name).await? else {
            return Ok(());
        };
        push(&self.store, &self.connector, &catalog).await
    }
}

/// Pushes `catalog` into the application namespaces of every environment
/// named after it.
pub(crate) async fn push<S: Store, C: Connect>(
    store: &S,
    connector: &C,
    catalog: &ServiceCatalog,
) -> Result<()> {
    let namespace = catalog.namespace().unwrap_or_default();
    let name = catalog.name_any();

    let mut errors = vec![];
    for env in store.list::<ClusterEnvironment>(&namespace, None).await? {
        if env.spec.environment_name != name || finalizer::is_deleting(&env) {
            continue;
        }
        let namespaces = &env.spec.application_namespaces;
        if let Err(error) = propagate::push_catalogs(connector, &env, namespaces, catalog).await {
            errors.push(error);
        }
    }
    join(errors)
}
