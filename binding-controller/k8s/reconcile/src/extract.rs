use crate::{Error, Result};
use binding_controller_core::{endpoint, Definition, SecretLookup, Source};
use binding_controller_k8s_api::{identity, RegisteredService, ResourceExt, Secret, ServiceClaim};
use binding_controller_k8s_store::{Object, Store};
use std::collections::BTreeMap;

/// Reads secrets from one namespace of a store.
struct StoreSecrets<'s, S> {
    store: &'s S,
    namespace: &'s str,
}

#[async_trait::async_trait]
impl<'s, S: Store> SecretLookup for StoreSecrets<'s, S> {
    async fn lookup(&self, name: &str, key: &str) -> anyhow::Result<Option<String>> {
        let secret = self.store.get::<Secret>(self.namespace, name).await?;
        Ok(secret.and_then(|s| secret_value(&s, key)))
    }
}

/// Reads a key from a secret, preferring unencoded `stringData`.
pub(crate) fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
        return Some(value.clone());
    }
    let bytes = secret.data.as_ref()?.get(key)?;
    String::from_utf8(bytes.0.clone()).ok()
}

pub(crate) fn definitions(service: &RegisteredService) -> Vec<Definition> {
    service
        .spec
        .service_endpoint_definition
        .iter()
        .filter_map(|item| {
            let source = match (&item.value, &item.value_from_secret) {
                (Some(value), _) if !value.is_empty() => Source::Inline(value.clone()),
                (_, Some(secret)) => Source::Secret {
                    name: secret.name.clone(),
                    key: secret.key.clone(),
                },
                _ => return None,
            };
            Some(Definition {
                name: item.name.clone(),
                source,
            })
        })
        .collect()
}

/// Builds the secret payload binding `claim` to `service`.
///
/// The payload holds every requested endpoint value, overlaid with the
/// claim's identity attributes. Fails with [`Error::MissingKeys`] unless all
/// requested keys could be read.
pub(crate) async fn payload<S: Store>(
    store: &S,
    claim: &ServiceClaim,
    service: &RegisteredService,
) -> Result<BTreeMap<String, String>> {
    let namespace = service.namespace().unwrap_or_default();
    let secrets = StoreSecrets {
        store,
        namespace: &namespace,
    };
    let requested = &claim.spec.service_endpoint_definition_keys;
    let extracted = endpoint::extract(&definitions(service), requested, &secrets)
        .await
        .map_err(Error::Extract)?;

    let missing = extracted.missing(requested);
    if !missing.is_empty() {
        return Err(Error::MissingKeys {
            claim: claim.key()?,
            missing: missing.into_iter().map(str::to_string).collect(),
        });
    }

    let mut values = extracted.values;
    for (name, value) in identity::pairs(&claim.spec.service_class_identity) {
        values.insert(name.to_string(), value.to_string());
    }
    Ok(values)
}
