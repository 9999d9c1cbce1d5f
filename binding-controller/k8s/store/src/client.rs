use crate::{
    credentials, Access, Cluster, ConnectError, Connect, CredentialsError, Error, EventStream,
    Object, Result, Store,
};
use futures::prelude::*;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    runtime::watcher,
    Client, Config, ResourceExt,
};

/// A store backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

/// Connects to worker clusters with kubeconfigs stored in the control plane.
#[derive(Clone)]
pub struct KubeConnector {
    local: KubeStore,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, K::key_of(namespace, name)))
    }

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| Error::from_kube(e, K::key_of(namespace, "")))?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let key = obj.key()?;
        self.api::<K>(&key.namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, key))
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let key = obj.key()?;
        self.api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, key))
    }

    async fn replace_status<K: Object>(&self, obj: &K) -> Result<K> {
        let key = obj.key()?;
        let value = serde_json::to_value(obj)?;
        // The resource version makes the merge patch fail on stale writes.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status"),
        });
        self.api::<K>(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, key))
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, K::key_of(namespace, name)))
    }
}

#[async_trait::async_trait]
impl Cluster for KubeStore {
    fn watch(&self, namespace: &str, resource: &ApiResource) -> EventStream {
        let api = Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, resource);
        watcher(api, watcher::Config::default()).boxed()
    }

    async fn check_connection(&self) -> Result<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| Error::Unavailable(e.to_string()))
    }

    async fn can_i(&self, namespace: &str, access: &Access) -> Result<bool> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(namespace.to_string()),
                    verb: Some(access.verb.to_string()),
                    group: Some(access.group.to_string()),
                    resource: Some(access.resource.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let review = Api::<SelfSubjectAccessReview>::all(self.client.clone())
            .create(&PostParams::default(), &review)
            .await
            .map_err(Error::Kube)?;
        Ok(review.status.is_some_and(|s| s.allowed))
    }
}

// === impl KubeConnector ===

impl KubeConnector {
    pub fn new(local: KubeStore) -> Self {
        Self { local }
    }
}

#[async_trait::async_trait]
impl Connect for KubeConnector {
    type Cluster = KubeStore;

    async fn connect(&self, namespace: &str, secret: &str) -> Result<KubeStore, ConnectError> {
        let creds = credentials::load(&self.local, namespace, secret).await?;
        let malformed = |reason: String| CredentialsError::Malformed {
            name: secret.to_string(),
            reason,
        };

        let kubeconfig = Kubeconfig::from_yaml(&creds.kubeconfig).map_err(|e| malformed(e.to_string()))?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| malformed(e.to_string()))?;
        if let Some(ns) = creds.namespace {
            config.default_namespace = ns;
        }

        let client = Client::try_from(config).map_err(|e| malformed(e.to_string()))?;
        Ok(KubeStore::new(client))
    }
}
