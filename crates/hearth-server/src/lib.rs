//! Hearth Server — dispatches HTTP, WebSocket and UDP events to handlers.
//!
//! The [`Dispatcher`] owns the handler table and server settings. Each
//! worker gets its own [`ServiceRegistry`] built by the registered start
//! callbacks, and every handler failure is contained according to the
//! recovery strategy of its event kind.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod runtime;
pub mod worker;

pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, WorkerDispatch};
pub use error::{RegistryError, ServerError};
pub use handlers::Handlers;
pub use metrics::{InMemoryMetrics, MetricsCollector, NoopMetrics};
pub use registry::ServiceRegistry;
pub use runtime::ServerHandle;
pub use worker::Worker;
