//! Setup-time error types and the JSON bodies sent when a handler fails.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or reading the config store.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file or directory does not exist.
    #[error("config source not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read config source {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config source {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A single-file source whose top level is not a table/object.
    #[error("config source {} does not yield a nested map", .0.display())]
    NotAMap(PathBuf),

    /// Only `.json` and `.toml` sources are understood.
    #[error("unsupported config format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// A section could not be bound onto the requested type.
    #[error("invalid config section `{key}`: {source}")]
    Invalid {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Literal `error` value of the HTTP 500 body.
pub const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

/// Body returned with status 500 when a request handler fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalErrorBody {
    pub error: String,
    pub message: String,
}

impl InternalErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: INTERNAL_SERVER_ERROR.to_string(),
            message: message.into(),
        }
    }
}

/// Frame sent back on a connection when a message handler fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageErrorBody {
    pub error: String,
}

impl MessageErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}
