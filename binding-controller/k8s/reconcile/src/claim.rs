//! Resolution of service claims against registered services.
//!
//! A pending claim is matched against the services of its namespace in list
//! order. The first available service whose identity includes the claim's and
//! whose environment constraints admit the claim's environment is bound: the
//! service is marked claimed, and its endpoint values are delivered to the
//! claim's target namespaces. A resolved claim is never re-matched; its values
//! are re-read from the bound service and delivered again.
//!
//! Marking the service claimed relies on the store's optimistic concurrency:
//! of two claims racing for the same service, the one writing second fails
//! with a conflict and is retried.

use crate::{extract, propagate, Error, Result};
use binding_controller_core::{envtag, is_subset};
use binding_controller_k8s_api::{
    condition::{self, Status},
    finalizer, identity, labels,
    registered_service::ServiceState,
    service_claim::{
        conditions, ClaimState, RegisteredServiceReference, Target, FINALIZER,
    },
    ClusterEnvironment, Condition, RegisteredService, ResourceExt, ServiceClaim,
};
use binding_controller_k8s_store::{Connect, Object, Store};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ClaimReconciler<S, C> {
    store: S,
    connector: C,
}

// === impl ClaimReconciler ===

impl<S: Store, C: Connect> ClaimReconciler<S, C> {
    pub fn new(store: S, connector: C) -> Self {
        Self { store, connector }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(mut claim) = self.store.get::<ServiceClaim>(namespace, name).await? else {
            debug!(%namespace, %name, "Claim not found");
            return Ok(());
        };

        if finalizer::is_deleting(&claim) {
            if finalizer::has(&claim, FINALIZER) {
                self.finalize(&claim).await?;
                finalizer::remove(&mut claim, FINALIZER);
                self.store.replace(&claim).await?;
                info!(%namespace, %name, "Released claim");
            }
            return Ok(());
        }

        if finalizer::add(&mut claim, FINALIZER) {
            claim = self.store.replace(&claim).await?;
        }

        let before = claim.status.clone();
        let valid = validate(&claim);
        let is_valid = valid.is_true();
        condition::set(&mut claim.status_mut().conditions, valid);
        if !is_valid {
            if claim.state().is_none() {
                claim.status_mut().state = Some(ClaimState::Invalid);
            }
            if claim.status != before {
                self.write_status(&claim).await?;
            }
            info!(%namespace, %name, "Claim is invalid");
            return Ok(());
        }

        initialize(&mut claim);
        if claim.status != before {
            claim = self.write_status(&claim).await?;
        }

        match claim.state() {
            Some(ClaimState::Resolved) => self.process_resolved(claim).await,
            _ => self.process_pending(claim).await,
        }
    }

    /// Matches a pending claim and binds it to the first eligible service.
    async fn process_pending(&self, mut claim: ServiceClaim) -> Result<()> {
        let key = claim.key()?;
        let environment = self.target_environment(&claim).await?;

        let services = self
            .store
            .list::<RegisteredService>(&key.namespace, None)
            .await?;
        let candidate = services.into_iter().find(|service| {
            service.is_available()
                && is_subset(
                    identity::pairs(&claim.spec.service_class_identity),
                    identity::pairs(&service.spec.service_class_identity),
                )
                && envtag::matches(&environment, service.environment_constraints())
        });
        let Some(mut service) = candidate else {
            self.set_pending(&mut claim, "no registered service matches the claim")
                .await?;
            return Err(Error::NoMatchingService(key));
        };

        let payload = match extract::payload(&self.store, &claim, &service).await {
            Ok(payload) => payload,
            Err(Error::MissingKeys { claim: key, missing }) => {
                let message = format!(
                    "registered service {} does not provide keys: {}",
                    service.name_any(),
                    missing.join(", ")
                );
                self.set_pending(&mut claim, &message).await?;
                return Err(Error::MissingKeys { claim: key, missing });
            }
            Err(error) => return Err(error),
        };

        service.set_state(ServiceState::Claimed);
        let service = self.store.replace_status(&service).await?;
        info!(claim = %key, service = %service.name_any(), "Claimed registered service");

        // Until the claim is durably resolved nothing else refers to the
        // service, so any failure from here on must release it.
        if let Err(error) = self.bind(&mut claim, &service, &payload).await {
            warn!(claim = %key, %error, "Failed to bind claim");
            if let Err(release) = self.release_service(service).await {
                warn!(claim = %key, error = %release, "Failed to release registered service");
            }
            return Err(error);
        }
        info!(claim = %key, "Resolved claim");
        Ok(())
    }

    /// Delivers `payload` and records `service` as the claim's binding.
    async fn bind(
        &self,
        claim: &mut ServiceClaim,
        service: &RegisteredService,
        payload: &BTreeMap<String, String>,
    ) -> Result<()> {
        let status = claim.status_mut();
        status.state = Some(ClaimState::Resolved);
        status.registered_service = Some(RegisteredServiceReference {
            name: service.name_any(),
            uid: service.uid().unwrap_or_default(),
        });

        propagate::propagate(&self.store, &self.connector, claim, payload).await?;

        condition::set(
            &mut claim.status_mut().conditions,
            Condition::new(conditions::READY, Status::True, conditions::RESOLVED, ""),
        );
        self.write_status(claim).await?;
        Ok(())
    }

    /// Delivers the values of the already bound service again.
    async fn process_resolved(&self, mut claim: ServiceClaim) -> Result<()> {
        let key = claim.key()?;
        let reference = claim
            .status
            .as_ref()
            .and_then(|s| s.registered_service.clone())
            .ok_or_else(|| Error::MissingReference(key.clone()))?;
        let mut service = self
            .store
            .get::<RegisteredService>(&key.namespace, &reference.name)
            .await?
            .filter(|s| s.uid().as_deref() == Some(reference.uid.as_str()))
            .ok_or_else(|| Error::MissingReference(key.clone()))?;

        let payload = extract::payload(&self.store, &claim, &service).await?;
        if service.state() != Some(ServiceState::Claimed) {
            service.set_state(ServiceState::Claimed);
            self.store.replace_status(&service).await?;
        }
        propagate::propagate(&self.store, &self.connector, &claim, &payload).await?;

        let changed = condition::set(
            &mut claim.status_mut().conditions,
            Condition::new(conditions::READY, Status::True, conditions::RESOLVED, ""),
        );
        if changed {
            self.write_status(&claim).await?;
        }
        debug!(claim = %key, "Refreshed resolved claim");
        Ok(())
    }

    /// Retracts everything a claim delivered and releases its service.
    ///
    /// Running it again after it succeeded has no further effect.
    async fn finalize(&self, claim: &ServiceClaim) -> Result<()> {
        let key = claim.key()?;
        let Some(status) = &claim.status else {
            return Ok(());
        };
        let Some(target) = &status.original_target else {
            return Ok(());
        };

        let mut errors = vec![];
        if let Err(error) =
            propagate::retract(&self.store, &self.connector, &key.namespace, &key.name, target).await
        {
            errors.push(error);
        }
        if let Some(reference) = &status.registered_service {
            let service = self
                .store
                .get::<RegisteredService>(&key.namespace, &reference.name)
                .await;
            match service {
                Ok(Some(service))
                    if service.uid().as_deref() == Some(reference.uid.as_str())
                        && service.state() == Some(ServiceState::Claimed) =>
                {
                    if let Err(error) = self.release_service(service).await {
                        errors.push(error);
                    }
                }
                Ok(_) => {}
                Err(error) => errors.push(error.into()),
            }
        }
        crate::error::join(errors)
    }

    async fn release_service(&self, mut service: RegisteredService) -> Result<()> {
        service.set_state(ServiceState::Available);
        self.store.replace_status(&service).await?;
        info!(namespace = %service.namespace().unwrap_or_default(), service = %service.name_any(), "Released registered service");
        Ok(())
    }

    /// The environment name services must admit for this claim.
    async fn target_environment(&self, claim: &ServiceClaim) -> Result<String> {
        if let Some(ctx) = claim.cluster_context() {
            let namespace = claim.namespace().unwrap_or_default();
            let env = self
                .store
                .get::<ClusterEnvironment>(&namespace, &ctx.cluster_environment_name)
                .await?
                .ok_or_else(|| {
                    Error::Invalid(format!(
                        "cluster environment {namespace}/{} not found",
                        ctx.cluster_environment_name
                    ))
                })?;
            return Ok(env.spec.environment_name);
        }
        Ok(claim.environment_tag().unwrap_or_default().to_string())
    }

    async fn set_pending(&self, claim: &mut ServiceClaim, message: &str) -> Result<()> {
        let before = claim.status.clone();
        let status = claim.status_mut();
        status.state = Some(ClaimState::Pending);
        condition::set(
            &mut status.conditions,
            Condition::new(
                conditions::READY,
                Status::False,
                conditions::NO_MATCHING_SERVICE_FOUND,
                message,
            ),
        );
        if claim.status != before {
            *claim = self.write_status(claim).await?;
        }
        Ok(())
    }

    /// Writes the claim's status, copying it to the claim it mirrors when it
    /// was read from a worker cluster.
    async fn write_status(&self, claim: &ServiceClaim) -> Result<ServiceClaim> {
        let claim = self.store.replace_status(claim).await?;
        if let Err(error) = self.mirror_status(&claim).await {
            warn!(namespace = %claim.namespace().unwrap_or_default(), name = %claim.name_any(), %error, "Failed to update remote claim status");
        }
        Ok(claim)
    }

    async fn mirror_status(&self, claim: &ServiceClaim) -> Result<()> {
        let Some(ctx) = claim.cluster_context() else {
            return Ok(());
        };
        let origin = claim.labels().get(labels::NAMESPACE);
        let Some(remote_ns) = origin.filter(|ns| **ns == ctx.namespace) else {
            return Ok(());
        };

        let namespace = claim.namespace().unwrap_or_default();
        let Some(env) = self
            .store
            .get::<ClusterEnvironment>(&namespace, &ctx.cluster_environment_name)
            .await?
        else {
            return Ok(());
        };
        let cluster = propagate::connect(&self.connector, &env).await?;

        let Some(mut remote) = cluster
            .get::<ServiceClaim>(remote_ns, &claim.name_any())
            .await?
        else {
            debug!(namespace = %remote_ns, name = %claim.name_any(), "Remote claim not found");
            return Ok(());
        };
        if remote.status == claim.status {
            return Ok(());
        }
        remote.status = claim.status.clone();
        cluster.replace_status(&remote).await?;
        Ok(())
    }
}

/// Returns true if a change to `service` may let `claim` make progress.
///
/// A claimed service concerns the resolved claim bound to it; an available
/// service concerns every pending claim of its namespace.
pub fn is_triggered_by(claim: &ServiceClaim, service: &RegisteredService) -> bool {
    if claim.namespace() != service.namespace() {
        return false;
    }
    match (claim.state(), service.state()) {
        (Some(ClaimState::Resolved), Some(ServiceState::Claimed)) => {
            let bound = claim
                .status
                .as_ref()
                .and_then(|s| s.registered_service.as_ref());
            bound.is_some_and(|r| Some(r.uid.as_str()) == service.uid().as_deref())
        }
        (Some(ClaimState::Pending), Some(ServiceState::Available)) => true,
        _ => false,
    }
}

/// Checks the claim's target and the fields that may not change after
/// initialization.
fn validate(claim: &ServiceClaim) -> Condition {
    let spec = &claim.spec;
    if !spec.target.as_ref().is_some_and(Target::is_well_formed) {
        return Condition::new(
            conditions::VALID,
            Status::False,
            conditions::MISSING_FIELD,
            "exactly one of target.environmentTag and target.applicationClusterContext must be set",
        );
    }

    let mut updated = vec![];
    if let Some(status) = &claim.status {
        if status
            .original_service_class_identity
            .as_ref()
            .is_some_and(|o| *o != spec.service_class_identity)
        {
            updated.push("serviceClassIdentity");
        }
        if status
            .original_service_endpoint_definition_keys
            .as_ref()
            .is_some_and(|o| *o != spec.service_endpoint_definition_keys)
        {
            updated.push("serviceEndpointDefinitionKeys");
        }
        if status
            .original_target
            .as_ref()
            .is_some_and(|o| Some(o) != spec.target.as_ref())
        {
            updated.push("target");
        }
    }
    if !updated.is_empty() {
        return Condition::new(
            conditions::VALID,
            Status::False,
            conditions::UPDATED_IMMUTABLE_FIELD,
            format!("immutable fields were updated: {}", updated.join(", ")),
        );
    }

    Condition::new(
        conditions::VALID,
        Status::True,
        conditions::VALIDATION_SUCCEEDED,
        "",
    )
}

/// Assigns the claim ID and snapshots the immutable fields, once.
fn initialize(claim: &mut ServiceClaim) {
    let spec = claim.spec.clone();
    let status = claim.status_mut();
    if status.claim_id.as_deref().unwrap_or_default().is_empty() {
        status.claim_id = Some(uuid::Uuid::new_v4().to_string());
    }
    if matches!(status.state, None | Some(ClaimState::Invalid)) {
        status.state = Some(ClaimState::Pending);
        status.original_service_class_identity = Some(spec.service_class_identity);
        status.original_service_endpoint_definition_keys =
            Some(spec.service_endpoint_definition_keys);
        status.original_target = spec.target;
    }
}

#[cfg(test)]
mod tests;
