//! Remote cluster credentials, stored as secrets in the control plane.

use crate::{ConnectError, Store};
use k8s_openapi::api::core::v1::Secret;

/// Secret key holding a serialized kubeconfig.
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Optional secret key naming the namespace the credentials are scoped to.
pub const NAMESPACE_KEY: &str = "namespace";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterCredentials {
    pub kubeconfig: String,
    pub namespace: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("cluster context secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("cluster context secret {name} has no {field:?} key")]
    MissingField { name: String, field: &'static str },

    #[error("cluster context secret {name} is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

// === impl ClusterCredentials ===

impl ClusterCredentials {
    pub fn from_secret(secret: &Secret) -> Result<Self, CredentialsError> {
        let name = secret.metadata.name.clone().unwrap_or_default();

        let missing = || CredentialsError::MissingField {
            name: name.clone(),
            field: KUBECONFIG_KEY,
        };
        let kubeconfig = match value(secret, KUBECONFIG_KEY) {
            None => return Err(missing()),
            Some(Ok(kubeconfig)) if kubeconfig.trim().is_empty() => return Err(missing()),
            Some(Ok(kubeconfig)) => kubeconfig,
            Some(Err(reason)) => {
                return Err(CredentialsError::Malformed {
                    name: name.clone(),
                    reason,
                })
            }
        };

        let namespace = value(secret, NAMESPACE_KEY)
            .and_then(Result::ok)
            .filter(|ns| !ns.is_empty());

        Ok(Self {
            kubeconfig,
            namespace,
        })
    }
}

/// Reads the credentials held in `namespace/name`.
pub async fn load<S: Store>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Result<ClusterCredentials, ConnectError> {
    let secret = store
        .get::<Secret>(namespace, name)
        .await?
        .ok_or_else(|| CredentialsError::SecretNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
    Ok(ClusterCredentials::from_secret(&secret)?)
}

fn value(secret: &Secret, key: &str) -> Option<Result<String, String>> {
    if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
        return Some(Ok(value.clone()));
    }
    let bytes = secret.data.as_ref()?.get(key)?;
    Some(String::from_utf8(bytes.0.clone()).map_err(|e| e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use maplit::btreemap;

    fn secret(data: std::collections::BTreeMap<String, ByteString>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("worker".to_string()),
                namespace: Some("binding-system".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn reads_kubeconfig_and_namespace() {
        let s = secret(btreemap! {
            KUBECONFIG_KEY.to_string() => ByteString(b"apiVersion: v1".to_vec()),
            NAMESPACE_KEY.to_string() => ByteString(b"apps".to_vec()),
        });
        let creds = ClusterCredentials::from_secret(&s).unwrap();
        assert_eq!(creds.kubeconfig, "apiVersion: v1");
        assert_eq!(creds.namespace.as_deref(), Some("apps"));
    }

    #[test]
    fn kubeconfig_is_required() {
        let s = secret(btreemap! {
            NAMESPACE_KEY.to_string() => ByteString(b"apps".to_vec()),
        });
        assert!(matches!(
            ClusterCredentials::from_secret(&s),
            Err(CredentialsError::MissingField { field: KUBECONFIG_KEY, .. })
        ));

        let s = secret(btreemap! {
            KUBECONFIG_KEY.to_string() => ByteString(b"  ".to_vec()),
        });
        assert!(matches!(
            ClusterCredentials::from_secret(&s),
            Err(CredentialsError::MissingField { .. })
        ));
    }

    #[test]
    fn kubeconfig_must_be_text() {
        let s = secret(btreemap! {
            KUBECONFIG_KEY.to_string() => ByteString(vec![0xff, 0xfe]),
        });
        assert!(matches!(
            ClusterCredentials::from_secret(&s),
            Err(CredentialsError::Malformed { .. })
        ));
    }
}
