//! An in-process store.
//!
//! Records are kept as JSON documents and follow the API server's write
//! semantics closely enough to exercise controllers without a cluster:
//! resource versions are checked on every update, finalizers defer removal,
//! owner references cascade removal, and watches replay the current state
//! before streaming changes.

use crate::{
    credentials, Access, Cluster, ConnectError, Connect, CredentialsError, Error, EventStream, Key,
    Object, Result, Store,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use kube::{
    api::{ApiResource, DynamicObject},
    runtime::watcher::Event,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const CHANGES_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    changes: broadcast::Sender<Change>,
}

/// Resolves credentials against clusters registered by kubeconfig contents.
#[derive(Clone)]
pub struct MemoryConnector {
    local: MemoryStore,
    clusters: Arc<Mutex<HashMap<String, MemoryStore>>>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Id, Value>,
    version: u64,
    unreachable: bool,
    failing: HashSet<String>,
    denied: HashSet<(String, Access)>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Id {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Clone, Debug)]
struct Change {
    id: Id,
    object: Value,
    deleted: bool,
}

// === impl MemoryStore ===

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGES_CAPACITY);
        Self {
            state: Default::default(),
            changes,
        }
    }
}

impl MemoryStore {
    /// Makes every operation fail as if the API server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Makes writes into `namespace` fail.
    pub fn fail_writes(&self, namespace: impl ToString) {
        self.state.lock().failing.insert(namespace.to_string());
    }

    pub fn allow_writes(&self, namespace: &str) {
        self.state.lock().failing.remove(namespace);
    }

    /// Denies `access` in `namespace` to permission checks.
    pub fn deny(&self, namespace: impl ToString, access: Access) {
        self.state.lock().denied.insert((namespace.to_string(), access));
    }

    fn id<K: Object>(namespace: &str, name: &str) -> Id {
        Id {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn publish(&self, id: Id, object: Value, deleted: bool) {
        // No receivers is fine.
        let _ = self.changes.send(Change {
            id,
            object,
            deleted,
        });
    }
}

impl State {
    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(Error::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self, namespace: &str) -> Result<()> {
        self.check_reachable()?;
        if self.failing.contains(namespace) {
            return Err(Error::Unavailable(format!(
                "writes to namespace {namespace} are failing"
            )));
        }
        Ok(())
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn check_version(&self, id: &Id, current: &Value, desired: &Value) -> Result<()> {
        match meta_str(desired, "resourceVersion") {
            Some(v) if Some(v) != meta_str(current, "resourceVersion") => {
                Err(Error::Conflict(key(id)))
            }
            _ => Ok(()),
        }
    }

    /// Removes a record and, transitively, the records it owns.
    fn remove(&mut self, id: &Id) -> Vec<(Id, Value, bool)> {
        let Some(object) = self.objects.remove(id) else {
            return vec![];
        };
        let uid = meta_str(&object, "uid").map(str::to_string);
        let mut changes = vec![(id.clone(), object, true)];

        let Some(uid) = uid else {
            return changes;
        };
        let owned = self
            .objects
            .iter()
            .filter(|(_, obj)| owners(obj).any(|o| o == uid))
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in owned {
            changes.extend(self.delete(&id));
        }
        changes
    }

    /// Marks a record with finalizers for deletion, or removes it.
    fn delete(&mut self, id: &Id) -> Vec<(Id, Value, bool)> {
        let Some(object) = self.objects.get(id) else {
            return vec![];
        };
        if !has_finalizers(object) {
            return self.remove(id);
        }
        if meta_str(object, "deletionTimestamp").is_some() {
            return vec![];
        }

        let version = self.next_version();
        let Some(object) = self.objects.get_mut(id) else {
            return vec![];
        };
        object["metadata"]["deletionTimestamp"] = chrono::Utc::now().to_rfc3339().into();
        object["metadata"]["resourceVersion"] = version.into();
        vec![(id.clone(), object.clone(), false)]
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let state = self.state.lock();
        state.check_reachable()?;
        state
            .objects
            .get(&Self::id::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Into::into)
    }

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<K>> {
        let requirements = selector
            .unwrap_or_default()
            .split(',')
            .filter(|r| !r.is_empty())
            .map(|r| r.split_once('=').unwrap_or((r, "")))
            .collect::<Vec<_>>();

        let state = self.state.lock();
        state.check_reachable()?;
        let kind = Self::id::<K>(namespace, "");
        state
            .objects
            .iter()
            .filter(|(id, _)| {
                id.api_version == kind.api_version
                    && id.kind == kind.kind
                    && id.namespace == namespace
            })
            .filter(|(_, obj)| {
                requirements
                    .iter()
                    .all(|(k, v)| obj["metadata"]["labels"][*k].as_str() == Some(*v))
            })
            .map(|(_, obj)| serde_json::from_value(obj.clone()).map_err(Into::into))
            .collect()
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let key = obj.key()?;
        let id = Self::id::<K>(&key.namespace, &key.name);
        let mut object = serde_json::to_value(obj)?;

        let mut state = self.state.lock();
        state.check_writable(&key.namespace)?;
        if state.objects.contains_key(&id) {
            return Err(Error::AlreadyExists(key));
        }

        let version = state.next_version();
        object["apiVersion"] = id.api_version.clone().into();
        object["kind"] = id.kind.clone().into();
        if meta_str(&object, "uid").is_none() {
            object["metadata"]["uid"] = format!("uid-{version}").into();
        }
        object["metadata"]["resourceVersion"] = version.into();
        if let Some(meta) = object["metadata"].as_object_mut() {
            meta.remove("deletionTimestamp");
        }

        state.objects.insert(id.clone(), object.clone());
        drop(state);

        self.publish(id, object.clone(), false);
        Ok(serde_json::from_value(object)?)
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let key = obj.key()?;
        let id = Self::id::<K>(&key.namespace, &key.name);
        let mut object = serde_json::to_value(obj)?;

        let mut state = self.state.lock();
        state.check_writable(&key.namespace)?;
        let current = state
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.clone()))?;
        state.check_version(&id, &current, &object)?;

        // Identity, deletion state and status are not writable through the
        // main resource.
        object["apiVersion"] = id.api_version.clone().into();
        object["kind"] = id.kind.clone().into();
        object["metadata"]["uid"] = current["metadata"]["uid"].clone();
        match current["metadata"].get("deletionTimestamp") {
            Some(ts) => object["metadata"]["deletionTimestamp"] = ts.clone(),
            None => {
                if let Some(meta) = object["metadata"].as_object_mut() {
                    meta.remove("deletionTimestamp");
                }
            }
        }
        if let Some(obj) = object.as_object_mut() {
            match current.get("status") {
                Some(status) => {
                    obj.insert("status".to_string(), status.clone());
                }
                None => {
                    obj.remove("status");
                }
            }
        }
        object["metadata"]["resourceVersion"] = state.next_version().into();

        let changes = if meta_str(&object, "deletionTimestamp").is_some() && !has_finalizers(&object)
        {
            state.objects.insert(id.clone(), object.clone());
            state.remove(&id)
        } else {
            state.objects.insert(id.clone(), object.clone());
            vec![(id, object.clone(), false)]
        };
        drop(state);

        for (id, obj, deleted) in changes {
            self.publish(id, obj, deleted);
        }
        Ok(serde_json::from_value(object)?)
    }

    async fn replace_status<K: Object>(&self, obj: &K) -> Result<K> {
        let key = obj.key()?;
        let id = Self::id::<K>(&key.namespace, &key.name);
        let desired = serde_json::to_value(obj)?;

        let mut state = self.state.lock();
        state.check_writable(&key.namespace)?;
        let mut object = state
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.clone()))?;
        state.check_version(&id, &object, &desired)?;

        if let Some(obj) = object.as_object_mut() {
            match desired.get("status") {
                Some(status) if !status.is_null() => {
                    obj.insert("status".to_string(), status.clone());
                }
                _ => {
                    obj.remove("status");
                }
            }
        }
        object["metadata"]["resourceVersion"] = state.next_version().into();
        state.objects.insert(id.clone(), object.clone());
        drop(state);

        self.publish(id, object.clone(), false);
        Ok(serde_json::from_value(object)?)
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        let id = Self::id::<K>(namespace, name);

        let mut state = self.state.lock();
        state.check_writable(namespace)?;
        if !state.objects.contains_key(&id) {
            return Err(Error::NotFound(K::key_of(namespace, name)));
        }
        let changes = state.delete(&id);
        drop(state);

        for (id, obj, deleted) in changes {
            self.publish(id, obj, deleted);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Cluster for MemoryStore {
    fn watch(&self, namespace: &str, resource: &ApiResource) -> EventStream {
        let api_version = resource.api_version.clone();
        let kind = resource.kind.clone();
        let namespace = namespace.to_string();
        let selects = move |id: &Id| {
            id.api_version == api_version && id.kind == kind && id.namespace == namespace
        };

        // Subscribe before taking the snapshot so that no change is missed.
        let changes = BroadcastStream::new(self.changes.subscribe());
        let snapshot = self
            .state
            .lock()
            .objects
            .iter()
            .filter(|(id, _)| selects(id))
            .filter_map(|(_, obj)| dynamic(obj))
            .map(Event::InitApply)
            .collect::<Vec<_>>();

        let initial = std::iter::once(Event::Init)
            .chain(snapshot)
            .chain(std::iter::once(Event::InitDone))
            .map(Ok);
        let live = changes.filter_map(move |change| {
            let event = change.ok().filter(|c| selects(&c.id)).and_then(|c| {
                let obj = dynamic(&c.object)?;
                Some(if c.deleted {
                    Event::Delete(obj)
                } else {
                    Event::Apply(obj)
                })
            });
            future::ready(event.map(Ok))
        });

        stream::iter(initial).chain(live).boxed()
    }

    async fn check_connection(&self) -> Result<()> {
        self.state.lock().check_reachable()
    }

    async fn can_i(&self, namespace: &str, access: &Access) -> Result<bool> {
        let state = self.state.lock();
        state.check_reachable()?;
        Ok(!state
            .denied
            .contains(&(namespace.to_string(), access.clone())))
    }
}

// === impl MemoryConnector ===

impl MemoryConnector {
    /// Resolves credentials stored in `local`.
    pub fn new(local: MemoryStore) -> Self {
        Self {
            local,
            clusters: Default::default(),
        }
    }

    /// Registers the cluster reached with the kubeconfig `kubeconfig`.
    pub fn register(&self, kubeconfig: impl ToString, cluster: MemoryStore) {
        self.clusters.lock().insert(kubeconfig.to_string(), cluster);
    }
}

#[async_trait::async_trait]
impl Connect for MemoryConnector {
    type Cluster = MemoryStore;

    async fn connect(&self, namespace: &str, secret: &str) -> Result<MemoryStore, ConnectError> {
        let creds = credentials::load(&self.local, namespace, secret).await?;
        let cluster = self.clusters.lock().get(&creds.kubeconfig).cloned();
        cluster.ok_or_else(|| {
            CredentialsError::Malformed {
                name: secret.to_string(),
                reason: "unknown cluster".to_string(),
            }
            .into()
        })
    }
}

fn key(id: &Id) -> Key {
    Key::new(&id.kind, &id.namespace, &id.name)
}

fn meta_str<'v>(object: &'v Value, field: &str) -> Option<&'v str> {
    object.get("metadata")?.get(field)?.as_str()
}

fn has_finalizers(object: &Value) -> bool {
    object["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

fn owners(object: &Value) -> impl Iterator<Item = &str> {
    object["metadata"]["ownerReferences"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|o| o["uid"].as_str())
}

fn dynamic(object: &Value) -> Option<DynamicObject> {
    match serde_json::from_value(object.clone()) {
        Ok(obj) => Some(obj),
        Err(error) => {
            tracing::warn!(%error, "Failed to decode stored object");
            None
        }
    }
}
