//! Hearth Dispatcher — routes inbound events to the registered handlers.
//!
//! Every dispatch runs through one wrapper: open a fresh execution-context
//! slot, [`reset`](hearth_protocol::context::reset) it, run the handler with
//! panics caught, and on failure apply the recovery strategy for that event
//! kind ([`EventKind::recovery`]).

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use hearth_protocol::{
    Config, EventKind, InternalErrorBody, MessageErrorBody, Recovery, WorkerIdentity, context,
};
use hearth_transport::{Connection, ConnectionId, Datagram, EventSink, Frame};
use tracing::{Instrument, debug, debug_span, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handlers::{BoxFuture, Handlers};
use crate::metrics::{
    EVENTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUEST_FAILURES_TOTAL, HTTP_REQUESTS_TOTAL,
    MetricsCollector, NoopMetrics,
};
use crate::worker::Worker;

/// The Hearth dispatcher — owns the handler table and server settings.
pub struct Dispatcher {
    pub(crate) config: ServerConfig,
    /// Read-only settings handed to every worker
    pub(crate) settings: Config,
    pub(crate) handlers: Handlers,
    pub(crate) metrics: Arc<dyn MetricsCollector>,
}

impl Dispatcher {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            settings: Config::empty(),
            handlers: Handlers::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Build from a config store, reading server settings from its `server`
    /// section. The whole store is handed to workers.
    pub fn from_config(settings: Config) -> Result<Self, ServerError> {
        let config = ServerConfig::from_config(&settings)?;
        Ok(Self::new(config).with_settings(settings))
    }

    pub fn with_settings(mut self, settings: Config) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ServerConfig {
        &mut self.config
    }

    pub fn settings(&self) -> &Config {
        &self.settings
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    // ── Registration ──────────────────────────────────────────────────────

    /// Handle plain HTTP requests. Replaces any previous request handler.
    pub fn on_request<F, Fut, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Worker, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: IntoResponse,
    {
        self.handlers.request = Some(Arc::new(move |worker: Worker, request: Request| {
            let fut = handler(worker, request);
            Box::pin(async move { fut.await.map(IntoResponse::into_response) }) as BoxFuture<_>
        }));
        self
    }

    /// Handle newly established WebSocket connections. Replaces any previous one.
    pub fn on_connection_open<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Worker, Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers.connection_open = Some(Arc::new(move |worker: Worker, conn: Connection| {
            Box::pin(handler(worker, conn)) as BoxFuture<_>
        }));
        self
    }

    /// Handle inbound WebSocket frames. Replaces any previous message handler.
    pub fn on_message<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Worker, Connection, Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers.message = Some(Arc::new(
            move |worker: Worker, conn: Connection, frame: Frame| {
                Box::pin(handler(worker, conn, frame)) as BoxFuture<_>
            },
        ));
        self
    }

    /// Handle WebSocket disconnects. Replaces any previous close handler.
    pub fn on_connection_close<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Worker, ConnectionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers.connection_close = Some(Arc::new(move |worker: Worker, id: ConnectionId| {
            Box::pin(handler(worker, id)) as BoxFuture<_>
        }));
        self
    }

    /// Handle UDP datagrams. Replaces any previous datagram handler.
    pub fn on_datagram<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Worker, Datagram) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers.datagram = Some(Arc::new(move |worker: Worker, datagram: Datagram| {
            Box::pin(handler(worker, datagram)) as BoxFuture<_>
        }));
        self
    }

    /// Append a callback run once per worker at startup, after every
    /// previously added one. A failing callback aborts that worker.
    pub fn add_worker_start_callback<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Worker) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers
            .worker_start
            .push(Arc::new(move |worker: Worker| Box::pin(callback(worker)) as BoxFuture<_>));
        self
    }

    // ── Worker lifecycle ──────────────────────────────────────────────────

    /// Initialize worker `ordinal`: classify its role, build a fresh
    /// registry, and run every start callback with it in order.
    ///
    /// Start callback failures are not contained.
    pub async fn boot_worker(&self, ordinal: usize) -> Result<Worker, ServerError> {
        let identity = WorkerIdentity::new(ordinal, self.config.workers);
        info!(worker = ordinal, role = %identity.role(), "Starting {identity}");

        let worker = Worker::new(identity, self.settings.clone(), self.metrics.clone());

        for (index, callback) in self.handlers.worker_start.iter().enumerate() {
            callback(worker.clone()).await.map_err(|source| ServerError::WorkerStart {
                ordinal,
                index,
                source,
            })?;
        }

        info!(
            worker = ordinal,
            "Worker ready ({} start callbacks)",
            self.handlers.worker_start.len()
        );
        Ok(worker)
    }

    /// The event sink a booted worker serves traffic through.
    pub fn worker_dispatch(&self, worker: Worker) -> WorkerDispatch {
        WorkerDispatch {
            handlers: Arc::new(self.handlers.clone()),
            worker,
        }
    }
}

/// Dispatches one worker's events. Implements the transport's [`EventSink`].
pub struct WorkerDispatch {
    handlers: Arc<Handlers>,
    worker: Worker,
}

impl WorkerDispatch {
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    fn count_event(&self, kind: EventKind) {
        self.worker
            .metrics()
            .increment(EVENTS_TOTAL, &[("kind", kind.as_label())]);
    }
}

impl EventSink for WorkerDispatch {
    async fn request(&self, request: Request) -> Response {
        let started = Instant::now();

        let response = match self.handlers.request.clone() {
            Some(handler) => {
                let worker = self.worker.clone();
                match guarded(EventKind::Request, move || handler(worker, request)).await {
                    Ok(response) => response,
                    Err(failure) => {
                        self.worker.metrics().increment(HTTP_REQUEST_FAILURES_TOTAL, &[]);
                        contain(EventKind::Request, failure, Site::Request)
                            .unwrap_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response())
                    }
                }
            }
            None => StatusCode::NOT_FOUND.into_response(),
        };

        let metrics = self.worker.metrics();
        metrics.increment(HTTP_REQUESTS_TOTAL, &[("status", response.status().as_str())]);
        metrics.observe(HTTP_REQUEST_DURATION_SECONDS, started.elapsed().as_secs_f64(), &[]);
        response
    }

    async fn connection_opened(&self, conn: Connection) {
        self.count_event(EventKind::ConnectionOpen);
        self.worker.track(conn.clone());

        let Some(handler) = self.handlers.connection_open.clone() else {
            return;
        };
        let worker = self.worker.clone();
        let arg = conn.clone();
        let outcome = guarded(EventKind::ConnectionOpen, move || handler(worker, arg)).await;
        if let Err(failure) = outcome {
            contain(EventKind::ConnectionOpen, failure, Site::Connection(&conn));
        }
    }

    async fn message(&self, conn: Connection, frame: Frame) {
        self.count_event(EventKind::Message);

        let Some(handler) = self.handlers.message.clone() else {
            return;
        };
        let worker = self.worker.clone();
        let arg = conn.clone();
        let outcome = guarded(EventKind::Message, move || handler(worker, arg, frame)).await;
        if let Err(failure) = outcome {
            contain(EventKind::Message, failure, Site::Connection(&conn));
        }
    }

    async fn connection_closed(&self, id: ConnectionId) {
        self.count_event(EventKind::ConnectionClose);
        self.worker.untrack(id);

        let Some(handler) = self.handlers.connection_close.clone() else {
            return;
        };
        let worker = self.worker.clone();
        let outcome = guarded(EventKind::ConnectionClose, move || handler(worker, id)).await;
        if let Err(failure) = outcome {
            contain(EventKind::ConnectionClose, failure, Site::Closed(id));
        }
    }

    async fn datagram(&self, datagram: Datagram) {
        self.count_event(EventKind::Datagram);

        let Some(handler) = self.handlers.datagram.clone() else {
            return;
        };
        let worker = self.worker.clone();
        let peer = datagram.peer;
        let outcome = guarded(EventKind::Datagram, move || handler(worker, datagram)).await;
        if let Err(failure) = outcome {
            contain(EventKind::Datagram, failure, Site::Peer(peer));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch wrapper and containment
// ─────────────────────────────────────────────────────────────────────────────

/// A handler that returned `Err` or panicked.
#[derive(Debug)]
enum Failure {
    Error(anyhow::Error),
    Panic(String),
}

impl Failure {
    fn text(&self) -> String {
        match self {
            Failure::Error(e) => e.to_string(),
            Failure::Panic(msg) => msg.clone(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Failure::Error(_) => "error",
            Failure::Panic(_) => "panic",
        }
    }
}

/// Where a failed event came from.
enum Site<'a> {
    Request,
    Connection(&'a Connection),
    Closed(ConnectionId),
    Peer(SocketAddr),
}

/// Run a handler in its own freshly reset context slot with panics caught.
///
/// The handler is invoked inside the slot, so even its synchronous prologue
/// sees the new context.
async fn guarded<T, F, Fut>(kind: EventKind, invoke: F) -> Result<T, Failure>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    let run = context::scope(async move {
        context::reset();
        let request_id = context::request_id().unwrap_or_default();
        let span = debug_span!("event", kind = kind.as_label(), %request_id);
        async move { invoke().await }.instrument(span).await
    });

    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Failure::Error(e)),
        Err(panic) => Err(Failure::Panic(panic_message(panic.as_ref()))),
    }
}

/// Apply the recovery strategy for `kind`. Returns the response to send for
/// request failures.
fn contain(kind: EventKind, failure: Failure, site: Site<'_>) -> Option<Response> {
    let text = failure.text();
    let cause = failure.label();

    match kind.recovery() {
        Recovery::RespondWithErrorBody => {
            warn!(kind = kind.as_label(), cause, "Request handler failed: {text}");
            let body = InternalErrorBody::new(text);
            Some((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response())
        }
        Recovery::TerminateConnection { code } => {
            if let Site::Connection(conn) = site {
                warn!(kind = kind.as_label(), cause, "Closing {} with {code}: {text}", conn.id());
                conn.close(code, text);
            }
            None
        }
        Recovery::NotifyThenDiscard => {
            if let Site::Connection(conn) = site {
                let id = conn.id();
                debug!(kind = kind.as_label(), cause, "Message handler failed on {id}: {text}");
                if let Ok(json) = serde_json::to_string(&MessageErrorBody::new(text)) {
                    // The peer may be gone already
                    let _ = conn.send_text(json);
                }
            }
            None
        }
        Recovery::SilentDiscard => {
            if let Site::Closed(id) = site {
                debug!(kind = kind.as_label(), cause, "Close handler failed for {id}: {text}");
            }
            None
        }
        Recovery::LogOnly => {
            match site {
                Site::Peer(peer) => {
                    error!(kind = kind.as_label(), cause, %peer, "Datagram handler failed: {text}")
                }
                _ => error!(kind = kind.as_label(), cause, "Handler failed: {text}"),
            }
            None
        }
        // Worker start failures are returned from boot_worker, never contained here
        Recovery::Fatal => None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
