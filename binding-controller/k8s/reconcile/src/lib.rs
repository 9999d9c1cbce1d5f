#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Reconcilers for claims, registered services, catalogs, service classes
//! and cluster environments.

mod agent;
mod catalog;
mod claim;
mod environment;
mod error;
mod extract;
#[cfg(test)]
mod fixtures;
mod health_check;
mod namespaces;
mod propagate;
mod registered_service;
mod service_class;
pub mod watch;

pub use self::{
    agent::{AgentImages, NamespaceKind},
    catalog::CatalogReconciler,
    claim::{is_triggered_by, ClaimReconciler},
    environment::EnvironmentReconciler,
    error::{Error, Result},
    registered_service::RegisteredServiceReconciler,
    service_class::ServiceClassReconciler,
    watch::Watches,
};
