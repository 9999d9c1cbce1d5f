//! Records and clusters shared by the reconciler tests.

#![allow(dead_code)]

use binding_controller_k8s_api::{
    identity::ServiceClassIdentityItem,
    registered_service::{Constraints, SecretKeyReference, ServiceEndpointDefinitionItem, ServiceState},
    service_claim::Target,
    service_class::{ServiceClassResource, ServiceClassSpec},
    ClusterEnvironment, ClusterEnvironmentSpec, ObjectMeta, RegisteredService,
    RegisteredServiceSpec, Resource, Secret, ServiceClaim, ServiceClaimSpec, ServiceClass,
};
use binding_controller_k8s_store::{
    credentials::KUBECONFIG_KEY, Error as StoreError, MemoryConnector, MemoryStore, Object,
    Result as StoreResult, Store,
};
use maplit::btreemap;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Barrier;

pub const NS: &str = "binding-system";

/// A control plane with one registered worker cluster.
pub struct Fixture {
    pub store: MemoryStore,
    pub connector: MemoryConnector,
    pub worker: MemoryStore,
}

impl Fixture {
    pub fn new() -> Self {
        let store = MemoryStore::default();
        let connector = MemoryConnector::new(store.clone());
        let worker = MemoryStore::default();
        connector.register("worker", worker.clone());
        Self {
            store,
            connector,
            worker,
        }
    }

    /// Creates `env` along with credentials that reach the worker cluster.
    pub async fn add_environment(&self, env: ClusterEnvironment) -> ClusterEnvironment {
        let secret = Secret {
            metadata: meta(&env.spec.cluster_context_secret),
            string_data: Some(btreemap! { KUBECONFIG_KEY.to_string() => "worker".to_string() }),
            ..Default::default()
        };
        self.store.create(&secret).await.unwrap();
        self.store.create(&env).await.unwrap()
    }

    /// Creates `service` and marks it available.
    pub async fn add_available(&self, service: RegisteredService) -> RegisteredService {
        let mut service = self.store.create(&service).await.unwrap();
        service.set_state(ServiceState::Available);
        self.store.replace_status(&service).await.unwrap()
    }

    pub async fn service(&self, name: &str) -> RegisteredService {
        self.store
            .get::<RegisteredService>(NS, name)
            .await
            .unwrap()
            .expect("service must exist")
    }

    pub async fn claim(&self, name: &str) -> ServiceClaim {
        self.store
            .get::<ServiceClaim>(NS, name)
            .await
            .unwrap()
            .expect("claim must exist")
    }
}

/// Wraps a [`MemoryStore`] to interleave or refuse status writes.
#[derive(Clone)]
pub struct GatedStore {
    pub inner: MemoryStore,
    held: Option<Arc<Barrier>>,
    held_count: Arc<AtomicUsize>,
    refuse_resolution: Arc<AtomicBool>,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            held: None,
            held_count: Default::default(),
            refuse_resolution: Default::default(),
        }
    }

    /// Holds the first `n` registered service status writes until all of
    /// them are waiting, so that each was derived from the same read.
    pub fn hold_service_writes(mut self, n: usize) -> Self {
        self.held = Some(Arc::new(Barrier::new(n)));
        self.held_count = Arc::new(AtomicUsize::new(n));
        self
    }

    /// Fails the next status write that marks a claim resolved.
    pub fn refuse_next_resolution(self) -> Self {
        self.refuse_resolution.store(true, Ordering::SeqCst);
        self
    }

    fn is_resolution<K: Object>(obj: &K) -> bool {
        <K as Resource>::kind(&()) == "ServiceClaim"
            && serde_json::to_value(obj)
                .map(|v| v["status"]["state"] == "Resolved")
                .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl Store for GatedStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> StoreResult<Option<K>> {
        self.inner.get(namespace, name).await
    }

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&str>) -> StoreResult<Vec<K>> {
        self.inner.list(namespace, selector).await
    }

    async fn create<K: Object>(&self, obj: &K) -> StoreResult<K> {
        self.inner.create(obj).await
    }

    async fn replace<K: Object>(&self, obj: &K) -> StoreResult<K> {
        self.inner.replace(obj).await
    }

    async fn replace_status<K: Object>(&self, obj: &K) -> StoreResult<K> {
        if <K as Resource>::kind(&()) == "RegisteredService" {
            if let Some(barrier) = &self.held {
                let remaining = self.held_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
                if remaining.is_ok() {
                    barrier.wait().await;
                }
            }
        }
        if Self::is_resolution(obj) && self.refuse_resolution.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict(obj.key()?));
        }
        self.inner.replace_status(obj).await
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> StoreResult<()> {
        self.inner.delete::<K>(namespace, name).await
    }
}

pub fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(NS.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn identity(pairs: &[(&str, &str)]) -> Vec<ServiceClassIdentityItem> {
    pairs
        .iter()
        .map(|(name, value)| ServiceClassIdentityItem::new(name, value))
        .collect()
}

pub fn mk_env(name: &str, environment: &str, applications: &[&str], services: &[&str]) -> ClusterEnvironment {
    ClusterEnvironment {
        metadata: meta(name),
        spec: ClusterEnvironmentSpec {
            environment_name: environment.to_string(),
            cluster_context_secret: format!("{name}-kubeconfig"),
            description: None,
            labels: vec![],
            application_namespaces: applications.iter().map(ToString::to_string).collect(),
            service_namespaces: services.iter().map(ToString::to_string).collect(),
            contact_info: None,
            synchronization_strategy: None,
        },
        status: None,
    }
}

/// A service with inline endpoint values.
pub fn mk_service(
    name: &str,
    identity_pairs: &[(&str, &str)],
    values: &[(&str, &str)],
    environments: &[&str],
) -> RegisteredService {
    RegisteredService {
        metadata: meta(name),
        spec: RegisteredServiceSpec {
            service_class_identity: identity(identity_pairs),
            service_endpoint_definition: values
                .iter()
                .map(|(name, value)| ServiceEndpointDefinitionItem {
                    name: name.to_string(),
                    value: Some(value.to_string()),
                    value_from_secret: None,
                })
                .collect(),
            constraints: Some(Constraints {
                environments: environments.iter().map(ToString::to_string).collect(),
            }),
            health_check: None,
            sla: None,
        },
        status: None,
    }
}

/// Adds an endpoint value read from `secret`.
pub fn with_secret_value(mut service: RegisteredService, name: &str, secret: &str, key: &str) -> RegisteredService {
    service.spec.service_endpoint_definition.push(ServiceEndpointDefinitionItem {
        name: name.to_string(),
        value: None,
        value_from_secret: Some(SecretKeyReference {
            name: secret.to_string(),
            key: key.to_string(),
        }),
    });
    service
}

pub fn mk_claim(name: &str, identity_pairs: &[(&str, &str)], keys: &[&str], target: Target) -> ServiceClaim {
    ServiceClaim {
        metadata: meta(name),
        spec: ServiceClaimSpec {
            service_class_identity: identity(identity_pairs),
            service_endpoint_definition_keys: keys.iter().map(ToString::to_string).collect(),
            application: None,
            target: Some(target),
            envs: vec![],
        },
        status: None,
    }
}

pub fn mk_class(name: &str, environments: &[&str]) -> ServiceClass {
    ServiceClass {
        metadata: meta(name),
        spec: ServiceClassSpec {
            constraints: Some(Constraints {
                environments: environments.iter().map(ToString::to_string).collect(),
            }),
            health_check: None,
            resource: ServiceClassResource {
                api_version: "postgresql.cnpg.io/v1".to_string(),
                kind: "Cluster".to_string(),
                service_endpoint_definition_mappings: Default::default(),
            },
            service_class_identity: vec![],
        },
        status: None,
    }
}
