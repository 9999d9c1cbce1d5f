use crate::ServiceClassIdentityItem;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The services an environment may claim. Named after the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "svcbind.io",
    version = "v1alpha1",
    kind = "ServiceCatalog",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCatalogSpec {
    #[serde(default)]
    pub services: Vec<ServiceCatalogService>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCatalogService {
    pub name: String,
    pub service_class_identity: Vec<ServiceClassIdentityItem>,
    pub service_endpoint_definition_keys: Vec<String>,
}

impl ServiceCatalogSpec {
    pub fn position(&self, service: &str) -> Option<usize> {
        self.services.iter().position(|s| s.name == service)
    }

    /// Inserts or replaces the entry for `entry.name`. Returns true if the
    /// catalog changed.
    pub fn upsert(&mut self, entry: ServiceCatalogService) -> bool {
        match self.position(&entry.name) {
            Some(i) if self.services[i] == entry => false,
            Some(i) => {
                self.services[i] = entry;
                true
            }
            None => {
                self.services.push(entry);
                true
            }
        }
    }

    /// Removes the entry for `service`. Returns true if the catalog changed.
    pub fn remove(&mut self, service: &str) -> bool {
        match self.position(service) {
            Some(i) => {
                self.services.remove(i);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, keys: &[&str]) -> ServiceCatalogService {
        ServiceCatalogService {
            name: name.to_string(),
            service_class_identity: vec![ServiceClassIdentityItem::new("type", "db")],
            service_endpoint_definition_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn upsert_and_remove() {
        let mut spec = ServiceCatalogSpec::default();
        assert!(spec.upsert(entry("pg", &["host"])));
        assert!(!spec.upsert(entry("pg", &["host"])));
        assert!(spec.upsert(entry("pg", &["host", "port"])));
        assert!(spec.upsert(entry("redis", &["host"])));
        assert_eq!(spec.services.len(), 2);
        assert_eq!(spec.services[0].service_endpoint_definition_keys.len(), 2);

        assert!(spec.remove("pg"));
        assert!(!spec.remove("pg"));
        assert_eq!(spec.position("redis"), Some(0));
    }
}
