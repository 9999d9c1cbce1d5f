//! Service endpoint extraction.
//!
//! A registered service describes how to reach it as a list of named
//! definitions, each carrying either an inline value or a reference to a key
//! in a secret. A claim requests a subset of those names.

use ahash::AHashSet as HashSet;
use anyhow::Result;
use std::collections::BTreeMap;

/// A single named endpoint value offered by a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub source: Source,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Inline(String),
    Secret { name: String, key: String },
}

/// Resolves values stored in secrets.
#[async_trait::async_trait]
pub trait SecretLookup {
    /// Returns the value of `key` in the secret `name`.
    ///
    /// A missing secret or key is `Ok(None)`; errors are reserved for failures
    /// to reach the store.
    async fn lookup(&self, name: &str, key: &str) -> Result<Option<String>>;
}

/// The values extracted for a claim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extracted {
    pub values: BTreeMap<String, String>,
}

// === impl Extracted ===

impl Extracted {
    /// The number of requested keys for which a value was found.
    pub fn satisfied(&self) -> usize {
        self.values.len()
    }

    /// Returns the requested keys that have no value, in request order.
    pub fn missing<'r>(&self, requested: &'r [String]) -> Vec<&'r str> {
        let mut seen = HashSet::new();
        requested
            .iter()
            .map(String::as_str)
            .filter(|k| !self.values.contains_key(*k) && seen.insert(*k))
            .collect()
    }

    pub fn is_complete(&self, requested: &[String]) -> bool {
        self.missing(requested).is_empty()
    }
}

/// Collects the values of the `requested` definitions.
///
/// Definitions that are not requested are ignored. A secret reference whose
/// secret or key cannot be found is skipped, leaving the key unsatisfied; only
/// lookup failures are returned as errors.
pub async fn extract<L>(
    definitions: &[Definition],
    requested: &[String],
    secrets: &L,
) -> Result<Extracted>
where
    L: SecretLookup + Sync + ?Sized,
{
    let requested = requested.iter().map(String::as_str).collect::<HashSet<_>>();

    let mut values = BTreeMap::new();
    for Definition { name, source } in definitions {
        if !requested.contains(name.as_str()) {
            continue;
        }

        match source {
            Source::Inline(value) => {
                values.insert(name.clone(), value.clone());
            }
            Source::Secret { name: secret, key } => match secrets.lookup(secret, key).await? {
                Some(value) => {
                    values.insert(name.clone(), value);
                }
                None => {
                    tracing::info!(%secret, %key, definition = %name, "Secret value not found");
                }
            },
        }
    }

    Ok(Extracted { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    struct Secrets(BTreeMap<(&'static str, &'static str), &'static str>);

    #[async_trait::async_trait]
    impl SecretLookup for Secrets {
        async fn lookup(&self, name: &str, key: &str) -> Result<Option<String>> {
            if name == "unreachable" {
                anyhow::bail!("connection refused");
            }
            Ok(self
                .0
                .iter()
                .find(|((n, k), _)| *n == name && *k == key)
                .map(|(_, v)| v.to_string()))
        }
    }

    fn inline(name: &str, value: &str) -> Definition {
        Definition {
            name: name.to_string(),
            source: Source::Inline(value.to_string()),
        }
    }

    fn secret(name: &str, secret: &str, key: &str) -> Definition {
        Definition {
            name: name.to_string(),
            source: Source::Secret {
                name: secret.to_string(),
                key: key.to_string(),
            },
        }
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn secrets() -> Secrets {
        Secrets(btreemap! {
            ("db-creds", "password") => "hunter2",
        })
    }

    #[tokio::test]
    async fn inline_and_secret_values() {
        let defs = [
            inline("host", "db.local"),
            inline("port", "5432"),
            secret("password", "db-creds", "password"),
            inline("user", "admin"),
        ];
        let requested = keys(&["host", "port", "password"]);

        let extracted = extract(&defs, &requested, &secrets()).await.unwrap();
        assert_eq!(
            extracted.values,
            btreemap! {
                "host".to_string() => "db.local".to_string(),
                "port".to_string() => "5432".to_string(),
                "password".to_string() => "hunter2".to_string(),
            }
        );
        assert_eq!(extracted.satisfied(), 3);
        assert!(extracted.is_complete(&requested));
    }

    #[tokio::test]
    async fn missing_secret_is_skipped() {
        let defs = [inline("host", "db.local"), secret("password", "gone", "password")];
        let requested = keys(&["host", "password"]);

        let extracted = extract(&defs, &requested, &secrets()).await.unwrap();
        assert_eq!(extracted.satisfied(), 1);
        assert_eq!(extracted.missing(&requested), vec!["password"]);
    }

    #[tokio::test]
    async fn missing_definition_is_reported() {
        let defs = [inline("host", "db.local")];
        let requested = keys(&["host", "port"]);

        let extracted = extract(&defs, &requested, &secrets()).await.unwrap();
        assert!(!extracted.is_complete(&requested));
        assert_eq!(extracted.missing(&requested), vec!["port"]);
    }

    #[tokio::test]
    async fn lookup_failures_are_errors() {
        let defs = [secret("password", "unreachable", "password")];
        let requested = keys(&["password"]);
        assert!(extract(&defs, &requested, &secrets()).await.is_err());
    }

    #[tokio::test]
    async fn unrequested_secrets_are_not_fetched() {
        let defs = [inline("host", "db.local"), secret("password", "unreachable", "password")];
        let requested = keys(&["host"]);

        let extracted = extract(&defs, &requested, &secrets()).await.unwrap();
        assert_eq!(extracted.satisfied(), 1);
    }
}
