use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(Key),

    #[error("{0} already exists")]
    AlreadyExists(Key),

    #[error("{0} was modified concurrently")]
    Conflict(Key),

    #[error("{0} has no name or namespace")]
    Unidentified(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Kube(kube::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Identifies a stored record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Classifies an API server error for the record identified by `key`.
    pub(crate) fn from_kube(error: kube::Error, key: Key) -> Self {
        let status = match &error {
            kube::Error::Api(rsp) => Some((rsp.code, rsp.reason.clone())),
            _ => None,
        };
        match status {
            Some((404, _)) => Self::NotFound(key),
            Some((409, reason)) if reason == "AlreadyExists" => Self::AlreadyExists(key),
            Some((409, _)) => Self::Conflict(key),
            _ => Self::Kube(error),
        }
    }
}

// === impl Key ===

impl Key {
    pub fn new(kind: impl ToString, namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}
