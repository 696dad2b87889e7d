//! HTTP/WebSocket/UDP transport using Axum.
//!
//! Listeners are bound once by the process ([`Listeners::bind`]) and every
//! request worker calls [`serve`] with its own clone, so all workers accept on
//! the same sockets. Inbound traffic is handed to an [`EventSink`], which owns
//! all application semantics.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    extract::{
        ConnectInfo, Request, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use hearth_protocol::close_code;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionId, Datagram, Frame, Handshake, Outbound};
use crate::error::TransportError;

/// Largest UDP payload we read in one `recv_from`.
const MAX_DATAGRAM: usize = 65_535;

/// Close reasons are limited to 123 bytes on the wire.
const MAX_CLOSE_REASON: usize = 123;

/// Receives every inbound event from the transport.
///
/// Implemented once per worker by the dispatcher.
pub trait EventSink: Send + Sync + 'static {
    /// Handle a plain HTTP request (anything that is not a WebSocket upgrade).
    fn request(&self, request: Request) -> impl Future<Output = Response> + Send;

    /// A WebSocket connection was established. Runs before any message is read.
    fn connection_opened(&self, conn: Connection) -> impl Future<Output = ()> + Send;

    /// A text or binary frame arrived. Awaited before the next frame is read,
    /// so per-connection ordering is preserved.
    fn message(&self, conn: Connection, frame: Frame) -> impl Future<Output = ()> + Send;

    /// The connection is gone; no more frames can be sent on it.
    fn connection_closed(&self, id: ConnectionId) -> impl Future<Output = ()> + Send;

    /// A UDP datagram arrived.
    fn datagram(&self, datagram: Datagram) -> impl Future<Output = ()> + Send;
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Hostname to bind to
    pub hostname: String,
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Path that accepts WebSocket upgrades
    pub ws_path: String,
    /// UDP port; `None` leaves UDP disabled
    pub udp_port: Option<u16>,
    /// Maximum concurrent WebSocket connections per worker
    pub max_connections: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".into(),
            port: 8080,
            ws_path: "/ws".into(),
            udp_port: None,
            max_connections: Some(1024),
        }
    }
}

/// Bound sockets shared by all request workers.
#[derive(Debug)]
pub struct Listeners {
    tcp: std::net::TcpListener,
    udp: Option<std::net::UdpSocket>,
}

impl Listeners {
    /// Bind the HTTP/WebSocket listener and, if configured, the UDP socket.
    ///
    /// A failed TCP bind is an error. A failed UDP bind only logs a warning and
    /// leaves UDP disabled.
    pub fn bind(config: &TransportConfig) -> Result<Self, TransportError> {
        let addr = resolve(&config.hostname, config.port)?;
        let tcp = std::net::TcpListener::bind(addr)
            .map_err(|source| TransportError::Bind { addr, source })?;
        tcp.set_nonblocking(true)?;
        info!("Listening for HTTP on {} (WebSocket path {})", tcp.local_addr()?, config.ws_path);

        let udp = match config.udp_port {
            Some(port) => match bind_udp(&config.hostname, port) {
                Ok(socket) => {
                    info!("Listening for UDP on {}", socket.local_addr()?);
                    Some(socket)
                }
                Err(e) => {
                    warn!("UDP listener disabled, bind on port {port} failed: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(Self { tcp, udp })
    }

    pub fn http_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.tcp.local_addr()?)
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// A handle to the same sockets for another worker.
    pub fn try_clone(&self) -> Result<Self, TransportError> {
        let udp = match &self.udp {
            Some(socket) => Some(socket.try_clone()?),
            None => None,
        };
        Ok(Self {
            tcp: self.tcp.try_clone()?,
            udp,
        })
    }
}

fn resolve(hostname: &str, port: u16) -> Result<SocketAddr, TransportError> {
    (hostname, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TransportError::InvalidAddress(format!("{hostname}:{port}")))
}

fn bind_udp(hostname: &str, port: u16) -> Result<std::net::UdpSocket, TransportError> {
    let addr = resolve(hostname, port)?;
    let socket = std::net::UdpSocket::bind(addr)
        .map_err(|source| TransportError::Bind { addr, source })?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Shared state for one worker's transport.
struct AppState<S: EventSink> {
    sink: Arc<S>,
    config: TransportConfig,
    /// Open WebSocket connections on this worker
    client_count: AtomicUsize,
    shutdown: watch::Receiver<bool>,
}

/// Serve traffic on `listeners` until `shutdown` flips to `true`.
///
/// Must run inside a tokio runtime; the worker's runtime drives every
/// connection and datagram task spawned here.
pub async fn serve<S: EventSink>(
    listeners: Listeners,
    config: TransportConfig,
    sink: Arc<S>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let listener = tokio::net::TcpListener::from_std(listeners.tcp)?;

    let udp_task = match listeners.udp {
        Some(socket) => {
            let socket = Arc::new(UdpSocket::from_std(socket)?);
            Some(tokio::spawn(serve_udp(socket, sink.clone(), shutdown.clone())))
        }
        None => None,
    };

    let state = Arc::new(AppState {
        sink,
        config: config.clone(),
        client_count: AtomicUsize::new(0),
        shutdown: shutdown.clone(),
    });

    let app = Router::new()
        .route(&config.ws_path, any(ws_upgrade_handler::<S>))
        .fallback(http_handler::<S>)
        .with_state(state);

    let mut stop = shutdown;
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { stopped(&mut stop).await })
    .await;

    if let Some(task) = udp_task {
        task.abort();
    }
    result.map_err(TransportError::Io)
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn http_handler<S: EventSink>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
) -> Response {
    state.sink.request(request).await
}

/// Upgrades on the WebSocket path become connections; any other request on
/// that path is plain HTTP and goes to the sink like the fallback.
async fn ws_upgrade_handler<S: EventSink>(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState<S>>>,
    request: Request,
) -> Response {
    let Ok(ws) = ws else {
        return state.sink.request(request).await;
    };

    // Check connection limit
    if let Some(max) = state.config.max_connections {
        let current = state.client_count.load(Ordering::Relaxed);
        if current >= max {
            warn!("Connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    let handshake = Handshake {
        uri: request.uri().clone(),
        headers: request.headers().clone(),
        peer: Some(peer),
    };
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, handshake))
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<S: EventSink>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    handshake: Handshake,
) {
    state.client_count.fetch_add(1, Ordering::Relaxed);

    let (conn, mut outbound_rx) = Connection::open(ConnectionId::next(), handshake);
    let id = conn.id();
    debug!("Client connected: {id}");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut shutdown = state.shutdown.clone();

    state.sink.connection_opened(conn.clone()).await;

    loop {
        tokio::select! {
            // Drain pushes first so a close requested by the open handler wins
            biased;

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = ws_tx.send(into_message(frame)).await {
                            debug!("Failed to send to {id}: {e}");
                            conn.mark_closed(close_code::ABNORMAL, "send failed");
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = ws_tx.send(close_message(code, &reason)).await;
                        break;
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = Frame::Text(text.as_str().to_owned());
                        state.sink.message(conn.clone(), frame).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        state.sink.message(conn.clone(), Frame::Binary(data)).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (f.code, f.reason.as_str().to_owned()),
                            None => (close_code::NO_STATUS, String::new()),
                        };
                        conn.mark_closed(code, reason);
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error for {id}: {e}");
                        conn.mark_closed(close_code::ABNORMAL, e.to_string());
                        break;
                    }
                    None => {
                        conn.mark_closed(close_code::ABNORMAL, "");
                        break;
                    }
                }
            }

            _ = stopped(&mut shutdown) => {
                if conn.close(close_code::GOING_AWAY, "server shutting down") {
                    let close = close_message(close_code::GOING_AWAY, "server shutting down");
                    let _ = ws_tx.send(close).await;
                }
                break;
            }
        }
    }

    state.sink.connection_closed(id).await;

    state.client_count.fetch_sub(1, Ordering::Relaxed);
    debug!(
        "Client disconnected: {id} (open on this worker: {})",
        state.client_count.load(Ordering::Relaxed)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// UDP
// ─────────────────────────────────────────────────────────────────────────────

async fn serve_udp<S: EventSink>(
    socket: Arc<UdpSocket>,
    sink: Arc<S>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, peer)) => {
                        let datagram = Datagram::new(
                            Bytes::copy_from_slice(&buf[..len]),
                            peer,
                            socket.clone(),
                        );
                        let sink = sink.clone();
                        tokio::spawn(async move { sink.datagram(datagram).await });
                    }
                    // ICMP errors from earlier sends surface here; keep receiving.
                    Err(e) => debug!("UDP receive error: {e}"),
                }
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves once shutdown is signalled. A dropped sender also counts.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: truncate_reason(reason).to_owned().into(),
    }))
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
