//! Service classes are copied into the service namespaces of every
//! environment whose name their constraints admit, where service agents use
//! them to register services.

use crate::{error::join, propagate, Result};
use binding_controller_core::envtag;
use binding_controller_k8s_api::{
    finalizer, service_class::FINALIZER, ClusterEnvironment, ResourceExt, ServiceClass,
};
use binding_controller_k8s_store::{Cluster, Connect, Store};
use tracing::{debug, info};

#[derive(Clone)]
pub struct ServiceClassReconciler<S, C> {
    store: S,
    connector: C,
}

fn admits(class: &ServiceClass, environment: &ClusterEnvironment) -> bool {
    !finalizer::is_deleting(environment)
        && envtag::matches(&environment.spec.environment_name, class.environment_constraints())
}

/// Copies the classes admitting `environment` into its `namespaces`.
pub(crate) async fn push_to_environment<S: Store, K: Cluster>(
    store: &S,
    cluster: &K,
    environment: &ClusterEnvironment,
    namespaces: &[String],
) -> Result<()> {
    let namespace = environment.namespace().unwrap_or_default();
    let mut errors = vec![];
    for class in store.list::<ServiceClass>(&namespace, None).await? {
        if finalizer::is_deleting(&class) || !admits(&class, environment) {
            continue;
        }
        if let Err(error) = propagate::push_service_class(cluster, namespaces, &class).await {
            errors.push(error);
        }
    }
    join(errors)
}

// === impl ServiceClassReconciler ===

impl<S: Store, C: Connect> ServiceClassReconciler<S, C> {
    pub fn new(store: S, connector: C) -> Self {
        Self { store, connector }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(mut class) = self.store.get::<ServiceClass>(namespace, name).await? else {
            debug!(%namespace, %name, "Service class not found");
            return Ok(());
        };

        if finalizer::is_deleting(&class) {
            if finalizer::has(&class, FINALIZER) {
                self.finalize(&class).await?;
                finalizer::remove(&mut class, FINALIZER);
                self.store.replace(&class).await?;
                info!(%namespace, %name, "Removed service class");
            }
            return Ok(());
        }

        if finalizer::add(&mut class, FINALIZER) {
            class = self.store.replace(&class).await?;
        }

        let mut errors = vec![];
        for env in self.environments(&class).await? {
            let pushed = async {
                let cluster = propagate::connect(&self.connector, &env).await?;
                propagate::push_service_class(&cluster, &env.spec.service_namespaces, &class).await
            };
            if let Err(error) = pushed.await {
                errors.push(error);
            }
        }
        join(errors)?;
        debug!(%namespace, %name, "Reconciled service class");
        Ok(())
    }

    async fn finalize(&self, class: &ServiceClass) -> Result<()> {
        let name = class.name_any();
        let mut errors = vec![];
        for env in self.environments(class).await? {
            let retracted = async {
                let cluster = propagate::connect(&self.connector, &env).await?;
                propagate::retract_service_class(&cluster, &env.spec.service_namespaces, &name).await
            };
            if let Err(error) = retracted.await {
                errors.push(error);
            }
        }
        join(errors)
    }

    /// The live environments of the class's namespace that it admits.
    async fn environments(&self, class: &ServiceClass) -> Result<Vec<ClusterEnvironment>> {
        let namespace = class.namespace().unwrap_or_default();
        Ok(self
            .store
            .list::<ClusterEnvironment>(&namespace, None)
            .await?
            .into_iter()
            .filter(|env| admits(class, env))
            .collect())
    }
}
