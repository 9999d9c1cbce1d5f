use crate::Result;
use binding_controller_k8s_api::{
    labels, service_claim::Target, ClusterEnvironment, ObjectMeta, RegisteredService,
    ResourceExt, Secret, ServiceClaim,
};
use binding_controller_k8s_store::{create_or_update, delete_if_exists, Cluster, Object, Store};
use tracing::{debug, info};

/// Applies the changes observed on remote records to the control plane.
#[async_trait::async_trait]
pub trait Mirror: Send + Sync + 'static {
    type Resource: Object;

    async fn apply(&self, obj: Self::Resource) -> Result<()>;

    async fn delete(&self, obj: Self::Resource) -> Result<()>;
}

/// Identifies the environment and remote namespace a mirror serves.
#[derive(Clone, Debug)]
pub struct Origin {
    /// The control-plane namespace of the environment.
    pub namespace: String,
    /// The name of the environment.
    pub environment: String,
    /// The watched worker namespace.
    pub remote_namespace: String,
}

/// Mirrors services registered in a worker namespace.
#[derive(Clone)]
pub struct RegisteredServiceMirror<S, K> {
    local: S,
    remote: K,
    origin: Origin,
}

/// Mirrors claims made in a worker application namespace.
#[derive(Clone)]
pub struct ServiceClaimMirror<S> {
    local: S,
    origin: Origin,
}

// === impl Origin ===

impl Origin {
    pub fn new(environment: &ClusterEnvironment, remote_namespace: impl ToString) -> Self {
        Self {
            namespace: environment.namespace().unwrap_or_default(),
            environment: environment.name_any(),
            remote_namespace: remote_namespace.to_string(),
        }
    }

    fn meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: Some(self.namespace.clone()),
            name: Some(name.to_string()),
            labels: Some(
                [
                    (labels::CLUSTER_ENVIRONMENT, self.environment.as_str()),
                    (labels::NAMESPACE, self.remote_namespace.as_str()),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ),
            ..Default::default()
        }
    }
}

/// Copies `desired`'s labels onto `current`, keeping any others.
fn merge_labels<K: Object>(current: &mut K, desired: &K) {
    let labels = current.labels_mut();
    for (k, v) in desired.labels() {
        labels.insert(k.clone(), v.clone());
    }
}

fn descriptor_name(service: &str) -> String {
    format!("{service}-descriptor")
}

// === impl RegisteredServiceMirror ===

impl<S: Store, K: Cluster> RegisteredServiceMirror<S, K> {
    pub fn new(local: S, remote: K, origin: Origin) -> Self {
        Self {
            local,
            remote,
            origin,
        }
    }
}

#[async_trait::async_trait]
impl<S: Store, K: Cluster> Mirror for RegisteredServiceMirror<S, K> {
    type Resource = RegisteredService;

    async fn apply(&self, remote: RegisteredService) -> Result<()> {
        let name = remote.name_any();
        let local = RegisteredService {
            metadata: self.origin.meta(&name),
            spec: remote.spec,
            status: None,
        };
        create_or_update(&self.local, local, |current, desired| {
            merge_labels(current, &desired);
            current.spec = desired.spec;
        })
        .await?;

        let descriptor = descriptor_name(&name);
        if let Some(secret) = self
            .remote
            .get::<Secret>(&self.origin.remote_namespace, &descriptor)
            .await?
        {
            let local = Secret {
                metadata: self.origin.meta(&descriptor),
                data: secret.data,
                string_data: secret.string_data,
                type_: secret.type_,
                ..Default::default()
            };
            create_or_update(&self.local, local, |current, desired| {
                merge_labels(current, &desired);
                current.data = desired.data;
                current.string_data = desired.string_data;
            })
            .await?;
        }

        debug!(service = %name, remote = %self.origin.remote_namespace, "Mirrored registered service");
        Ok(())
    }

    async fn delete(&self, remote: RegisteredService) -> Result<()> {
        let name = remote.name_any();
        let ns = &self.origin.namespace;
        delete_if_exists::<_, RegisteredService>(&self.local, ns, &name).await?;
        delete_if_exists::<_, Secret>(&self.local, ns, &descriptor_name(&name)).await?;
        info!(service = %name, remote = %self.origin.remote_namespace, "Removed mirrored registered service");
        Ok(())
    }
}

// === impl ServiceClaimMirror ===

impl<S: Store> ServiceClaimMirror<S> {
    pub fn new(local: S, origin: Origin) -> Self {
        Self { local, origin }
    }
}

#[async_trait::async_trait]
impl<S: Store> Mirror for ServiceClaimMirror<S> {
    type Resource = ServiceClaim;

    async fn apply(&self, remote: ServiceClaim) -> Result<()> {
        let name = remote.name_any();
        if remote.environment_tag().is_some() {
            debug!(claim = %name, "Skipping claim targeting an environment tag");
            return Ok(());
        }

        let mut spec = remote.spec;
        spec.target = Some(Target::cluster_context(
            &self.origin.environment,
            &self.origin.remote_namespace,
        ));
        let local = ServiceClaim {
            metadata: self.origin.meta(&name),
            spec,
            status: None,
        };
        create_or_update(&self.local, local, |current, desired| {
            merge_labels(current, &desired);
            current.spec = desired.spec;
        })
        .await?;
        debug!(claim = %name, remote = %self.origin.remote_namespace, "Mirrored claim");
        Ok(())
    }

    async fn delete(&self, remote: ServiceClaim) -> Result<()> {
        let name = remote.name_any();
        delete_if_exists::<_, ServiceClaim>(&self.local, &self.origin.namespace, &name).await?;
        info!(claim = %name, remote = %self.origin.remote_namespace, "Removed mirrored claim");
        Ok(())
    }
}
