//! Onboarding of worker clusters.
//!
//! An environment is reconciled by checking that its cluster can be reached
//! with its stored credentials and that the agents may act in each declared
//! namespace. The namespaces that pass are bound. Service namespaces receive
//! the service classes admitting the environment; application namespaces
//! receive the bindings of the claims targeting it and its catalog. With the
//! pull strategy, both are watched for services and claims.

use crate::{
    agent::{AgentImages, NamespaceKind},
    catalog,
    error::join,
    extract, namespaces, propagate, service_class,
    watch::{Origin, RegisteredServiceMirror, ServiceClaimMirror, Session, Watches},
    Result,
};
use binding_controller_k8s_api::{
    cluster_environment::{conditions, EnvironmentState, SynchronizationStrategy, FINALIZER},
    condition::{self, Status},
    finalizer,
    service_claim::ClaimState,
    ApiResource, ClusterEnvironment, Condition, RegisteredService, ResourceExt, ServiceClaim,
    GROUP,
};
use binding_controller_k8s_store::{Access, Cluster, Connect, Store};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, warn};

/// Needed by application agents to report bindings.
const APPLICATION_ACCESS: Access = Access {
    verb: "create",
    group: GROUP,
    resource: "servicebindings",
};

/// Needed by service agents to discover services.
const SERVICE_ACCESS: Access = Access {
    verb: "list",
    group: GROUP,
    resource: "registeredservices",
};

#[derive(Clone)]
pub struct EnvironmentReconciler<S, C> {
    store: S,
    connector: C,
    images: Arc<AgentImages>,
    watches: Arc<Watches>,
}

/// A reachable cluster and the declared namespaces that passed the
/// permission checks.
struct Checked<K> {
    cluster: K,
    applications: Vec<String>,
    services: Vec<String>,
}

// === impl EnvironmentReconciler ===

impl<S: Store, C: Connect> EnvironmentReconciler<S, C> {
    pub fn new(store: S, connector: C, images: AgentImages, watches: Arc<Watches>) -> Self {
        Self {
            store,
            connector,
            images: Arc::new(images),
            watches,
        }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(mut env) = self.store.get::<ClusterEnvironment>(namespace, name).await? else {
            debug!(%namespace, %name, "Cluster environment not found");
            return Ok(());
        };

        if finalizer::is_deleting(&env) {
            if finalizer::has(&env, FINALIZER) {
                self.finalize(&env).await?;
                finalizer::remove(&mut env, FINALIZER);
                self.store.replace(&env).await?;
                info!(%namespace, %name, "Removed cluster environment");
            }
            return Ok(());
        }

        if finalizer::add(&mut env, FINALIZER) {
            env = self.store.replace(&env).await?;
        }

        let before = env.status.clone();
        let checked = self.check(&mut env).await;
        if env.status != before {
            env = self.store.replace_status(&env).await?;
        }
        let Checked {
            cluster,
            applications,
            services,
        } = checked?;

        let mut errors = vec![];
        for (kind, declared, healthy) in [
            (
                NamespaceKind::Application,
                &env.spec.application_namespaces,
                &applications,
            ),
            (NamespaceKind::Service, &env.spec.service_namespaces, &services),
        ] {
            if let Err(error) =
                namespaces::unbind(&self.store, Some(&cluster), &env, kind, declared).await
            {
                errors.push(error);
            }
            if let Err(error) =
                namespaces::bind(&self.store, &cluster, &env, kind, healthy, &self.images).await
            {
                errors.push(error);
            }
        }

        if let Err(error) =
            service_class::push_to_environment(&self.store, &cluster, &env, &services).await
        {
            errors.push(error);
        }
        if let Err(error) = self.push_claims(&env, &cluster, &applications).await {
            errors.push(error);
        }
        if let Err(error) = self.push_catalog(&env, &cluster, &applications).await {
            errors.push(error);
        }

        let env_name = env.name_any();
        match env.synchronization_strategy() {
            SynchronizationStrategy::Pull => {
                if let Err(error) = self.sync_watches(&env, &cluster, &applications, &services).await {
                    errors.push(error);
                }
            }
            SynchronizationStrategy::Push => self.watches.stop_all(&env_name).await,
        }

        join(errors)?;
        debug!(%namespace, %name, "Reconciled cluster environment");
        Ok(())
    }

    /// Re-checks every environment in `namespace` and records the outcome.
    pub async fn check_health(&self, namespace: &str) -> Result<()> {
        let mut errors = vec![];
        for mut env in self.store.list::<ClusterEnvironment>(namespace, None).await? {
            if finalizer::is_deleting(&env) {
                continue;
            }
            let before = env.status.clone();
            if let Err(error) = self.check(&mut env).await {
                warn!(%namespace, name = %env.name_any(), %error, "Cluster environment is unhealthy");
            }
            if env.status != before {
                if let Err(error) = self.store.replace_status(&env).await {
                    errors.push(error.into());
                }
            }
        }
        join(errors)
    }

    /// Checks credentials, connectivity and permissions, recording the
    /// outcome in the environment's status.
    async fn check(&self, env: &mut ClusterEnvironment) -> Result<Checked<C::Cluster>> {
        let cluster = match propagate::connect(&self.connector, env).await {
            Ok(cluster) => cluster,
            Err(error) => {
                set_online(env, false, conditions::CLIENT_CREATION_ERROR, error.to_string());
                return Err(error);
            }
        };
        if let Err(error) = cluster.check_connection().await {
            set_online(env, false, conditions::CONNECTION_ERROR, error.to_string());
            return Err(error.into());
        }
        set_online(env, true, conditions::CONNECTION_SUCCESSFUL, "");

        let failed_applications =
            failed_namespaces(&cluster, &env.spec.application_namespaces, &APPLICATION_ACCESS)
                .await?;
        let failed_services =
            failed_namespaces(&cluster, &env.spec.service_namespaces, &SERVICE_ACCESS).await?;

        let status = env.status_mut();
        condition::set(
            &mut status.conditions,
            permissions(conditions::APPLICATION_PERMISSIONS, &failed_applications),
        );
        condition::set(
            &mut status.conditions,
            permissions(conditions::SERVICE_PERMISSIONS, &failed_services),
        );
        status.state = Some(if failed_applications.is_empty() && failed_services.is_empty() {
            EnvironmentState::Online
        } else {
            EnvironmentState::Partial
        });

        Ok(Checked {
            applications: without(&env.spec.application_namespaces, &failed_applications),
            services: without(&env.spec.service_namespaces, &failed_services),
            cluster,
        })
    }

    /// Delivers the bindings of the resolved claims targeting `env`.
    async fn push_claims(
        &self,
        env: &ClusterEnvironment,
        cluster: &C::Cluster,
        applications: &[String],
    ) -> Result<()> {
        let namespace = env.namespace().unwrap_or_default();
        let mut errors = vec![];
        for claim in self.store.list::<ServiceClaim>(&namespace, None).await? {
            if claim.state() != Some(ClaimState::Resolved) || finalizer::is_deleting(&claim) {
                continue;
            }
            let targets = if claim.environment_tag() == Some(env.spec.environment_name.as_str()) {
                applications.to_vec()
            } else if let Some(ctx) = claim
                .cluster_context()
                .filter(|ctx| ctx.cluster_environment_name == env.name_any())
            {
                applications
                    .iter()
                    .filter(|ns| **ns == ctx.namespace)
                    .cloned()
                    .collect()
            } else {
                continue;
            };

            let payload = match self.bound_payload(&claim).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(error) => {
                    errors.push(error);
                    continue;
                }
            };
            for ns in &targets {
                if let Err(error) = propagate::push_binding(cluster, ns, &claim, &payload).await {
                    errors.push(error);
                }
            }
        }
        join(errors)
    }

    async fn bound_payload(&self, claim: &ServiceClaim) -> Result<Option<BTreeMap<String, String>>> {
        let Some(reference) = claim.status.as_ref().and_then(|s| s.registered_service.as_ref()) else {
            return Ok(None);
        };
        let namespace = claim.namespace().unwrap_or_default();
        let service = self
            .store
            .get::<RegisteredService>(&namespace, &reference.name)
            .await?
            .filter(|s| s.uid().as_deref() == Some(reference.uid.as_str()));
        match service {
            Some(service) => extract::payload(&self.store, claim, &service).await.map(Some),
            None => Ok(None),
        }
    }

    async fn push_catalog(
        &self,
        env: &ClusterEnvironment,
        cluster: &C::Cluster,
        applications: &[String],
    ) -> Result<()> {
        let namespace = env.namespace().unwrap_or_default();
        let catalog = catalog::ensure(&self.store, &namespace, &env.spec.environment_name).await?;
        let mut errors = vec![];
        for ns in applications {
            if let Err(error) = propagate::push_catalog(cluster, ns, &catalog).await {
                errors.push(error);
            }
        }
        join(errors)
    }

    async fn sync_watches(
        &self,
        env: &ClusterEnvironment,
        cluster: &C::Cluster,
        applications: &[String],
        services: &[String],
    ) -> Result<()> {
        let env_name = env.name_any();
        let services = self.watches.services.sync(&env_name, services, |ns| {
            let events = cluster.watch(&ns, &ApiResource::erase::<RegisteredService>(&()));
            let mirror =
                RegisteredServiceMirror::new(self.store.clone(), cluster.clone(), Origin::new(env, &ns));
            Session::start(format!("{env_name}/{ns}"), events, mirror)
        });
        let services = services.await;

        let applications = self.watches.applications.sync(&env_name, applications, |ns| {
            let events = cluster.watch(&ns, &ApiResource::erase::<ServiceClaim>(&()));
            let mirror = ServiceClaimMirror::new(self.store.clone(), Origin::new(env, &ns));
            Session::start(format!("{env_name}/{ns}"), events, mirror)
        });
        let applications = applications.await;

        join(services.err().into_iter().chain(applications.err()).collect())
    }

    async fn finalize(&self, env: &ClusterEnvironment) -> Result<()> {
        let cluster = match propagate::connect(&self.connector, env).await {
            Ok(cluster) => Some(cluster),
            Err(error) => {
                warn!(name = %env.name_any(), %error, "Cluster unreachable; agents are left in place");
                None
            }
        };

        let mut errors = vec![];
        for kind in [NamespaceKind::Application, NamespaceKind::Service] {
            if let Err(error) = namespaces::unbind(&self.store, cluster.as_ref(), env, kind, &[]).await {
                errors.push(error);
            }
        }
        self.watches.stop_all(&env.name_any()).await;
        if let Err(error) = catalog::release(&self.store, env).await {
            errors.push(error);
        }
        join(errors)
    }
}

fn set_online(env: &mut ClusterEnvironment, online: bool, reason: &str, message: impl ToString) {
    let status = env.status_mut();
    condition::set(
        &mut status.conditions,
        Condition::new(conditions::ONLINE, Status::from(online), reason, message),
    );
    status.state = Some(if online {
        EnvironmentState::Online
    } else {
        EnvironmentState::Offline
    });
}

fn permissions(type_: &str, failed: &[String]) -> Condition {
    if failed.is_empty() {
        return Condition::new(type_, Status::False, conditions::PERMISSIONS_GRANTED, "");
    }
    Condition::new(
        type_,
        Status::True,
        conditions::PERMISSIONS_NOT_GRANTED,
        format!("permissions not granted in namespaces: {}", failed.join(", ")),
    )
}

async fn failed_namespaces<K: Cluster>(
    cluster: &K,
    namespaces: &[String],
    access: &Access,
) -> Result<Vec<String>> {
    let mut failed = vec![];
    for ns in namespaces {
        if !cluster.can_i(ns, access).await? {
            failed.push(ns.clone());
        }
    }
    Ok(failed)
}

fn without(namespaces: &[String], excluded: &[String]) -> Vec<String> {
    namespaces
        .iter()
        .filter(|ns| !excluded.contains(ns))
        .cloned()
        .collect()
}
