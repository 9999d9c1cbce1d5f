//! Drives the reconcilers from watches on the control plane.
//!
//! Only the replica holding the write lease reconciles; the others requeue
//! every record until they acquire it.

use crate::reconcile::{
    CatalogReconciler, ClaimReconciler, EnvironmentReconciler, Error,
    RegisteredServiceReconciler, ServiceClassReconciler,
};
use crate::k8s::{
    ClusterEnvironment, RegisteredService, ResourceExt, ServiceCatalog, ServiceClaim, ServiceClass,
};
use crate::store::{Connect, Object, Store};
use futures::prelude::*;
use kube::runtime::{controller::Action, Controller};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Reconciles one kind of record by namespace and name.
#[async_trait::async_trait]
pub trait Reconcile: Send + Sync + 'static {
    type Resource: Object;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// State shared by every reconciliation of one controller.
pub struct Context<R> {
    reconciler: R,
    claims: watch::Receiver<Arc<kubert::lease::Claim>>,
    hostname: String,
    requeue_after: Duration,
}

// === impl Context ===

impl<R> Context<R> {
    pub fn new(
        reconciler: R,
        claims: watch::Receiver<Arc<kubert::lease::Claim>>,
        hostname: String,
        requeue_after: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            reconciler,
            claims,
            hostname,
            requeue_after,
        })
    }

    fn is_leader(&self) -> bool {
        self.claims.borrow().is_current_for(&self.hostname)
    }
}

/// Runs `controller` until its watches end.
pub async fn run<R: Reconcile>(controller: Controller<R::Resource>, ctx: Arc<Context<R>>) {
    let kind = <R::Resource as kube::Resource>::kind(&()).to_string();
    info!(%kind, "Starting controller");
    controller
        .run(reconcile::<R>, error_policy::<R>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(%obj, "Reconciled"),
                Err(error) => debug!(%error, "Reconciliation failed"),
            }
        })
        .await;
    info!(%kind, "Controller stopped");
}

async fn reconcile<R: Reconcile>(
    obj: Arc<R::Resource>,
    ctx: Arc<Context<R>>,
) -> Result<Action, Error> {
    if !ctx.is_leader() {
        return Ok(Action::requeue(ctx.requeue_after));
    }
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    ctx.reconciler.reconcile(&namespace, &name).await?;
    Ok(Action::await_change())
}

fn error_policy<R: Reconcile>(obj: Arc<R::Resource>, error: &Error, ctx: Arc<Context<R>>) -> Action {
    if error.is_conflict() {
        debug!(namespace = ?obj.namespace(), name = %obj.name_any(), "Stale write; retrying");
    } else {
        warn!(namespace = ?obj.namespace(), name = %obj.name_any(), %error, "Reconciliation failed");
    }
    Action::requeue(ctx.requeue_after)
}

/// Re-checks the health of every environment each `interval`.
pub async fn monitor<S: Store, C: Connect>(
    ctx: Arc<Context<EnvironmentReconciler<S, C>>>,
    namespace: String,
    interval: Duration,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        if !ctx.is_leader() {
            continue;
        }
        debug!(%namespace, "Checking cluster environments");
        if let Err(error) = ctx.reconciler.check_health(&namespace).await {
            warn!(%namespace, %error, "Failed to check cluster environments");
        }
    }
}

#[async_trait::async_trait]
impl<S: Store, C: Connect> Reconcile for ClaimReconciler<S, C> {
    type Resource = ServiceClaim;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error> {
        ClaimReconciler::reconcile(self, namespace, name).await
    }
}

#[async_trait::async_trait]
impl<S: Store> Reconcile for RegisteredServiceReconciler<S> {
    type Resource = RegisteredService;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error> {
        RegisteredServiceReconciler::reconcile(self, namespace, name).await
    }
}

#[async_trait::async_trait]
impl<S: Store, C: Connect> Reconcile for CatalogReconciler<S, C> {
    type Resource = ServiceCatalog;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error> {
        CatalogReconciler::reconcile(self, namespace, name).await
    }
}

#[async_trait::async_trait]
impl<S: Store, C: Connect> Reconcile for ServiceClassReconciler<S, C> {
    type Resource = ServiceClass;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error> {
        ServiceClassReconciler::reconcile(self, namespace, name).await
    }
}

#[async_trait::async_trait]
impl<S: Store, C: Connect> Reconcile for EnvironmentReconciler<S, C> {
    type Resource = ClusterEnvironment;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error> {
        EnvironmentReconciler::reconcile(self, namespace, name).await
    }
}
