//! Handler signatures, one per event kind.
//!
//! Handlers are stored boxed behind `Arc` so every worker can share the same
//! table. Per-kind slots hold at most one handler; worker-start callbacks
//! accumulate in registration order.

use std::pin::Pin;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use hearth_transport::{Connection, ConnectionId, Datagram, Frame};

use crate::worker::Worker;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub type RequestHandler =
    Arc<dyn Fn(Worker, Request) -> BoxFuture<anyhow::Result<Response>> + Send + Sync>;
pub type ConnectionOpenHandler =
    Arc<dyn Fn(Worker, Connection) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;
pub type MessageHandler =
    Arc<dyn Fn(Worker, Connection, Frame) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;
pub type ConnectionCloseHandler =
    Arc<dyn Fn(Worker, ConnectionId) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;
pub type DatagramHandler =
    Arc<dyn Fn(Worker, Datagram) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;
pub type WorkerStartCallback =
    Arc<dyn Fn(Worker) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

/// The registered handler table.
#[derive(Clone, Default)]
pub struct Handlers {
    pub(crate) request: Option<RequestHandler>,
    pub(crate) connection_open: Option<ConnectionOpenHandler>,
    pub(crate) message: Option<MessageHandler>,
    pub(crate) connection_close: Option<ConnectionCloseHandler>,
    pub(crate) datagram: Option<DatagramHandler>,
    pub(crate) worker_start: Vec<WorkerStartCallback>,
}

impl Handlers {
    pub fn has_request(&self) -> bool {
        self.request.is_some()
    }

    pub fn has_connection_open(&self) -> bool {
        self.connection_open.is_some()
    }

    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    pub fn has_connection_close(&self) -> bool {
        self.connection_close.is_some()
    }

    pub fn has_datagram(&self) -> bool {
        self.datagram.is_some()
    }

    pub fn worker_start_count(&self) -> usize {
        self.worker_start.len()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("request", &self.has_request())
            .field("connection_open", &self.has_connection_open())
            .field("message", &self.has_message())
            .field("connection_close", &self.has_connection_close())
            .field("datagram", &self.has_datagram())
            .field("worker_start", &self.worker_start.len())
            .finish()
    }
}
