//! Error types for the engine.

use shellcache_net::NetError;
use thiserror::Error;

/// Errors raised by a [`CacheStorage`](crate::store::CacheStorage) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl CacheError {
    /// Create a manifest error.
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short label used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            CacheError::Store(_) => "store",
            CacheError::Network(_) => "network",
            CacheError::Manifest(_) => "manifest",
            CacheError::InvalidState(_) => "invalid_state",
            CacheError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
