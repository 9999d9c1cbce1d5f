use crate::{Cluster, CredentialsError, Error};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error(transparent)]
    Store(#[from] Error),
}

/// Builds clients for remote clusters from stored credentials.
#[async_trait::async_trait]
pub trait Connect: Clone + Send + Sync + 'static {
    type Cluster: Cluster;

    /// Connects with the credentials held in the secret `namespace/secret`.
    async fn connect(&self, namespace: &str, secret: &str) -> Result<Self::Cluster, ConnectError>;
}
