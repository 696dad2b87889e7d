//! Worker handle — holds all per-worker state.

use std::sync::Arc;

use dashmap::DashMap;
use hearth_protocol::{Config, WorkerIdentity, WorkerRole};
use hearth_transport::{Connection, ConnectionId, Frame, TransportError};

use crate::error::RegistryError;
use crate::metrics::MetricsCollector;
use crate::registry::ServiceRegistry;

/// Handle passed to every handler and worker-start callback.
///
/// Each worker owns a fresh [`ServiceRegistry`] and a table of the WebSocket
/// connections it serves. Nothing here is shared with other workers except
/// the read-only [`Config`] and the metrics collector.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    identity: WorkerIdentity,
    registry: Arc<ServiceRegistry>,
    config: Config,
    metrics: Arc<dyn MetricsCollector>,
    connections: DashMap<ConnectionId, Connection>,
}

impl Worker {
    /// A worker with a freshly constructed, empty registry.
    pub fn new(
        identity: WorkerIdentity,
        config: Config,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                identity,
                registry: Arc::new(ServiceRegistry::new()),
                config,
                metrics,
                connections: DashMap::new(),
            }),
        }
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.inner.identity
    }

    pub fn role(&self) -> WorkerRole {
        self.inner.identity.role()
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.inner.registry
    }

    /// Shorthand for `registry().make(id)`.
    pub fn make<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>, RegistryError> {
        self.inner.registry.make(id)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.inner.metrics
    }

    // ── Connections ───────────────────────────────────────────────────────

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.inner.connections.get(&id).map(|c| c.clone())
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.inner.connections.iter().map(|c| *c.key()).collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Push a frame to one connection on this worker.
    pub fn push(&self, id: ConnectionId, frame: impl Into<Frame>) -> Result<(), TransportError> {
        self.connection(id)
            .ok_or(TransportError::UnknownConnection(id))?
            .send(frame)
    }

    /// Push a frame to every open connection. Returns how many accepted it.
    pub fn broadcast(&self, frame: impl Into<Frame>) -> usize {
        let frame = frame.into();
        let targets: Vec<Connection> = self.inner.connections.iter().map(|c| c.clone()).collect();
        targets
            .iter()
            .filter(|conn| conn.send(frame.clone()).is_ok())
            .count()
    }

    /// Close one connection with `code`.
    pub fn disconnect(
        &self,
        id: ConnectionId,
        code: u16,
        reason: &str,
    ) -> Result<(), TransportError> {
        let conn = self.connection(id).ok_or(TransportError::UnknownConnection(id))?;
        if conn.close(code, reason) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed(id))
        }
    }

    pub(crate) fn track(&self, conn: Connection) {
        self.inner.connections.insert(conn.id(), conn);
    }

    pub(crate) fn untrack(&self, id: ConnectionId) {
        self.inner.connections.remove(&id);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("identity", &self.inner.identity)
            .field("connections", &self.inner.connections.len())
            .finish()
    }
}
