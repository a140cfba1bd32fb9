//! Error types for the artifact store.

use thiserror::Error;

/// Errors produced by the artifact store and its HTTP client.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("object store error on {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("object {key} not found")]
    NotFound { key: String },

    #[error("presigned URL expired: {url}")]
    Expired { url: String },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    /// Wrap an object_store error for `key`, keeping not-found distinct.
    pub(crate) fn store(key: impl Into<String>, source: object_store::Error) -> Self {
        let key = key.into();
        match source {
            object_store::Error::NotFound { .. } => CloudError::NotFound { key },
            source => CloudError::Store { key, source },
        }
    }
}

/// Result alias for artifact store operations.
pub type Result<T> = std::result::Result<T, CloudError>;
