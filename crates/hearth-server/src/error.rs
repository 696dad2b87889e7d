//! Error types for the dispatcher and the service registry.

use hearth_protocol::ConfigError;
use hearth_transport::TransportError;
use thiserror::Error;

/// Setup and lifecycle failures of the server process.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid server config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A worker-start callback failed; that worker never served traffic.
    #[error("worker {ordinal}: start callback #{index} failed: {source}")]
    WorkerStart {
        ordinal: usize,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("worker {ordinal} panicked")]
    WorkerPanicked { ordinal: usize },

    #[error("a worker exited before finishing startup")]
    StartupAborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Resolution failures of a [`ServiceRegistry`](crate::ServiceRegistry).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("binding not found for id `{id}`")]
    NotFound { id: String },

    #[error("binding `{id}` does not hold a `{expected}`")]
    TypeMismatch { id: String, expected: &'static str },

    #[error("factory for `{id}` failed: {source}")]
    Factory {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RegistryError {
    /// The binding id the error refers to.
    pub fn id(&self) -> &str {
        match self {
            RegistryError::NotFound { id }
            | RegistryError::TypeMismatch { id, .. }
            | RegistryError::Factory { id, .. } => id.as_str(),
        }
    }
}
