use async_trait::async_trait;

use crate::object::Object;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("conflict on {0}: the object has been modified")]
    Conflict(String),
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }
}

/// Read/write access to one kind in the backing store.
#[async_trait]
pub trait ObjectClient<K: Object>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, ClientError>;

    async fn update(&self, namespace: &str, obj: &K) -> Result<K, ClientError>;

    /// Write only the status block. Stores without a status endpoint
    /// for `K` answer `Unsupported`.
    async fn update_status(
        &self,
        _namespace: &str,
        _obj: &K,
    ) -> Result<K, ClientError> {
        Err(ClientError::Unsupported("update_status"))
    }
}
