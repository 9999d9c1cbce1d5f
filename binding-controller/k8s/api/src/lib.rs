#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster_environment;
pub mod condition;
pub mod finalizer;
pub mod identity;
pub mod labels;
pub mod registered_service;
pub mod service_binding;
pub mod service_catalog;
pub mod service_class;
pub mod service_claim;
mod watch;

pub use self::{
    cluster_environment::{ClusterEnvironment, ClusterEnvironmentSpec, ClusterEnvironmentStatus},
    condition::Condition,
    identity::ServiceClassIdentityItem,
    registered_service::{RegisteredService, RegisteredServiceSpec, RegisteredServiceStatus},
    service_binding::{ServiceBinding, ServiceBindingSpec, ServiceBindingStatus},
    service_catalog::{ServiceCatalog, ServiceCatalogSpec},
    service_class::{ServiceClass, ServiceClassSpec, ServiceClassStatus},
    service_claim::{ServiceClaim, ServiceClaimSpec, ServiceClaimStatus},
    watch::{Event, Watch},
};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::Deployment,
        batch::v1::{CronJob, Job},
        core::v1::{ConfigMap, Secret},
        rbac::v1::RoleBinding,
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
    ByteString,
};
pub use kube::{
    api::{ApiResource, DynamicObject, ObjectMeta, ResourceExt},
    core::NamespaceResourceScope,
    Client, Resource,
};

/// The API group of the records managed by this controller.
pub const GROUP: &str = "svcbind.io";

/// The API version of the records managed by this controller.
pub const API_VERSION: &str = "svcbind.io/v1alpha1";
