use crate::{Error, Key, Result};
use kube::{core::NamespaceResourceScope, Resource};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// A namespaced record with a static type.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + PartialEq
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn key(&self) -> Result<Key> {
        match (self.meta().namespace.as_deref(), self.meta().name.as_deref()) {
            (Some(ns), Some(name)) => Ok(Key::new(Self::kind(&()), ns, name)),
            _ => Err(Error::Unidentified(Self::kind(&()).to_string())),
        }
    }

    fn key_of(namespace: &str, name: &str) -> Key {
        Key::new(Self::kind(&()), namespace, name)
    }
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + PartialEq
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// A namespaced resource store with optimistic concurrency.
///
/// Writes carry the `resourceVersion` of the record they were derived from;
/// a stale version fails with [`Error::Conflict`]. Deleting a record that
/// carries finalizers only marks it for deletion; it is removed once an update
/// clears its finalizers. Removing a record removes the records that name it
/// as their owner.
#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Lists records in `namespace`, optionally filtered by an equality label
    /// selector (`k=v,k2=v2`).
    async fn list<K: Object>(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<K>>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replaces a record's metadata and spec. Its status is left unchanged.
    async fn replace<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replaces a record's status.
    async fn replace_status<K: Object>(&self, obj: &K) -> Result<K>;

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Creates `desired`, or merges it into the existing record with the same
/// name.
///
/// `merge` receives the stored record and the desired one and must only touch
/// the fields this controller owns. The record is written only if the merge
/// changed it.
pub async fn create_or_update<S, K, F>(store: &S, desired: K, merge: F) -> Result<K>
where
    S: Store,
    K: Object,
    F: FnOnce(&mut K, K) + Send,
{
    let key = desired.key()?;
    let Some(mut current) = store.get::<K>(&key.namespace, &key.name).await? else {
        tracing::debug!(%key, "Creating");
        return store.create(&desired).await;
    };

    let before = current.clone();
    merge(&mut current, desired);
    if current == before {
        return Ok(current);
    }

    tracing::debug!(%key, "Updating");
    store.replace(&current).await
}

/// Deletes a record, returning false if it did not exist.
pub async fn delete_if_exists<S: Store, K: Object>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Result<bool> {
    match store.delete::<K>(namespace, name).await {
        Ok(()) => Ok(true),
        Err(error) if error.is_not_found() => Ok(false),
        Err(error) => Err(error),
    }
}

