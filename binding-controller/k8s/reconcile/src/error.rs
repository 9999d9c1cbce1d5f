use binding_controller_k8s_store::{ConnectError, CredentialsError, Error as StoreError, Key};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error("failed to read endpoint values: {0}")]
    Extract(#[source] anyhow::Error),

    #[error("no registered service matches {0}")]
    NoMatchingService(Key),

    #[error("{claim} requests unavailable endpoint keys: {}", .missing.join(", "))]
    MissingKeys { claim: Key, missing: Vec<String> },

    #[error("{0} references a registered service that does not exist")]
    MissingReference(Key),

    #[error("{0}")]
    Invalid(String),

    #[error("watch on {0} did not complete its initial listing")]
    WatchSync(String),

    #[error("{}", display_all(.0))]
    Aggregate(Vec<Error>),
}

impl From<ConnectError> for Error {
    fn from(error: ConnectError) -> Self {
        match error {
            ConnectError::Credentials(e) => Self::Credentials(e),
            ConnectError::Store(e) => Self::Store(e),
        }
    }
}

impl Error {
    /// Returns true for the store's optimistic concurrency failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

/// Collapses independent failures into a single result.
pub fn join(mut errors: Vec<Error>) -> Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(Error::Aggregate(errors)),
    }
}

fn display_all(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_collapses_errors() {
        assert!(join(vec![]).is_ok());

        let one = join(vec![Error::Invalid("a".to_string())]).unwrap_err();
        assert!(matches!(one, Error::Invalid(_)));

        let many = join(vec![
            Error::Invalid("a".to_string()),
            Error::Invalid("b".to_string()),
        ])
        .unwrap_err();
        assert_eq!(many.to_string(), "a; b");
    }
}
