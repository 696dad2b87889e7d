//! Hearth - shared protocol types
//!
//! Leaf types used by the transport and the dispatcher: the immutable config
//! store, the task-local execution context, event kinds with their failure
//! recovery table, the JSON error bodies, and worker identity.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod worker;

pub use config::Config;
pub use context::ExecutionContext;
pub use error::{ConfigError, InternalErrorBody, MessageErrorBody, INTERNAL_SERVER_ERROR};
pub use event::{close_code, EventKind, Recovery};
pub use worker::{WorkerIdentity, WorkerRole};
