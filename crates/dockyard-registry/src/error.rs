//! Error types for the service registry.

use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to open registry: {0}")]
    Open(String),

    /// Another process holds the file lock.
    #[error("registry {0} is held by another process")]
    Locked(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl RegistryError {
    pub fn is_locked(&self) -> bool {
        matches!(self, RegistryError::Locked(_))
    }
}
