//! Errors of the cache, backup and version stores

use crate::provider::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("{provider} request failed: {error}")]
    Provider {
        provider: String,
        #[source]
        error: ProviderError,
    },

    #[error("No dataset stored for {0}")]
    MissingDataset(String),

    #[error("Backup version {version} not found for {name}")]
    MissingBackup { name: String, version: String },

    #[error("Checksum failed: {0}")]
    Checksum(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
