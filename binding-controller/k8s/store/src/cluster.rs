use crate::{Result, Store};
use futures::stream::BoxStream;
use kube::{
    api::{ApiResource, DynamicObject},
    runtime::watcher,
};

/// Untyped watch events for one resource type in one namespace.
pub type EventStream = BoxStream<'static, watcher::Result<watcher::Event<DynamicObject>>>;

/// An operation whose permission can be tested.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Access {
    pub verb: &'static str,
    pub group: &'static str,
    pub resource: &'static str,
}

/// A remote worker cluster.
#[async_trait::async_trait]
pub trait Cluster: Store {
    /// Watches a resource type in a namespace.
    ///
    /// The stream starts with the initial listing (`Init`, `InitApply`...,
    /// `InitDone`) followed by live changes.
    fn watch(&self, namespace: &str, resource: &ApiResource) -> EventStream;

    /// Checks that the cluster's API endpoint can be reached.
    async fn check_connection(&self) -> Result<()>;

    /// Tests whether the configured identity is allowed `access` in `namespace`.
    async fn can_i(&self, namespace: &str, access: &Access) -> Result<bool>;
}
