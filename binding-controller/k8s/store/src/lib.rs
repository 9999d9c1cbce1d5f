#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Access to the control-plane store and to remote worker clusters.

mod client;
mod cluster;
mod connect;
pub mod credentials;
mod error;
pub mod memory;
mod store;

pub use self::{
    client::{KubeConnector, KubeStore},
    cluster::{Access, Cluster, EventStream},
    connect::{ConnectError, Connect},
    credentials::{ClusterCredentials, CredentialsError},
    error::{Error, Key, Result},
    memory::{MemoryConnector, MemoryStore},
    store::{create_or_update, delete_if_exists, Object, Store},
};
