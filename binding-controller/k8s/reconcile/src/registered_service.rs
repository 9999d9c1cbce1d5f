use crate::{catalog, health_check, Result};
use binding_controller_k8s_api::{
    finalizer,
    registered_service::{ServiceState, FINALIZER},
    RegisteredService,
};
use binding_controller_k8s_store::Store;
use tracing::{debug, info};

/// Tracks the health of registered services and lists available services in
/// the catalogs of their namespace.
#[derive(Clone)]
pub struct RegisteredServiceReconciler<S> {
    store: S,
}

impl<S: Store> RegisteredServiceReconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(mut service) = self.store.get::<RegisteredService>(namespace, name).await? else {
            debug!(%namespace, %name, "Registered service not found");
            return Ok(());
        };

        if finalizer::is_deleting(&service) {
            if finalizer::has(&service, FINALIZER) {
                catalog::remove_service(&self.store, namespace, name).await?;
                health_check::remove(&self.store, &service).await?;
                finalizer::remove(&mut service, FINALIZER);
                self.store.replace(&service).await?;
                info!(%namespace, %name, "Removed registered service");
            }
            return Ok(());
        }

        if finalizer::add(&mut service, FINALIZER) {
            service = self.store.replace(&service).await?;
        }

        let state = match service.spec.health_check.clone() {
            Some(health) => health_check::check(&self.store, &service, &health).await?,
            None => {
                health_check::remove(&self.store, &service).await?;
                match service.state() {
                    Some(ServiceState::Claimed) => ServiceState::Claimed,
                    _ => ServiceState::Available,
                }
            }
        };

        let before = service.state();
        service.set_state(state);

        let catalogs = if service.is_available() {
            catalog::update_service(&self.store, &service).await?
        } else {
            catalog::remove_service(&self.store, namespace, name).await?
        };
        if !catalogs.is_empty() {
            debug!(%namespace, %name, catalogs = catalogs.len(), "Updated catalogs");
        }

        if before != Some(state) {
            self.store.replace_status(&service).await?;
            info!(%namespace, %name, %state, "Updated registered service");
        }
        Ok(())
    }
}
