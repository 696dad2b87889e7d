//! Connection and datagram handles given to event handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{HeaderMap, Uri};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::TransportError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Application-layer WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Frame::Binary(data)
    }
}

/// Work queued for the socket task that owns the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed { code: u16, reason: String },
}

/// Request metadata captured at WebSocket upgrade.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub uri: Uri,
    pub headers: HeaderMap,
    pub peer: Option<SocketAddr>,
}

/// Handle to one established WebSocket connection.
///
/// Cloning is cheap; every clone refers to the same connection. Frames can be
/// pushed at any time while the connection is open, independent of inbound
/// traffic.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    handshake: Handshake,
    state: Mutex<ConnectionState>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    /// Create an open connection and the receiver the socket task drains.
    pub fn open(
        id: ConnectionId,
        handshake: Handshake,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Self {
            inner: Arc::new(ConnectionInner {
                id,
                handshake,
                state: Mutex::new(ConnectionState::Open),
                outbound,
            }),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn handshake(&self) -> &Handshake {
        &self.inner.handshake
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.handshake.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.inner.state.lock(), ConnectionState::Open)
    }

    /// Queue a frame for delivery.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed(self.id()));
        }
        self.inner
            .outbound
            .send(Outbound::Frame(frame.into()))
            .map_err(|_| TransportError::ConnectionClosed(self.id()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(Frame::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send(Frame::Binary(data.into()))
    }

    pub fn send_json(&self, value: &serde_json::Value) -> Result<(), TransportError> {
        self.send(Frame::Text(value.to_string()))
    }

    /// Close the connection with `code`. Returns `false` if it was already closed.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        {
            let mut state = self.inner.state.lock();
            if !matches!(*state, ConnectionState::Open) {
                return false;
            }
            *state = ConnectionState::Closed {
                code,
                reason: reason.clone(),
            };
        }
        // The socket task may be gone already; the state change is what counts.
        let _ = self.inner.outbound.send(Outbound::Close { code, reason });
        true
    }

    /// Record that the peer went away. Keeps the first recorded close.
    pub fn mark_closed(&self, code: u16, reason: impl Into<String>) {
        let mut state = self.inner.state.lock();
        if matches!(*state, ConnectionState::Open) {
            *state = ConnectionState::Closed {
                code,
                reason: reason.into(),
            };
        }
    }
}

/// One inbound UDP datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Bytes,
    pub peer: SocketAddr,
    socket: Arc<UdpSocket>,
}

impl Datagram {
    pub fn new(payload: Bytes, peer: SocketAddr, socket: Arc<UdpSocket>) -> Self {
        Self {
            payload,
            peer,
            socket,
        }
    }

    /// Send `data` back to the peer this datagram came from.
    pub async fn reply(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.send_to(data, self.peer).await
    }

    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize, TransportError> {
        self.socket
            .send_to(data, target)
            .await
            .map_err(TransportError::Io)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}
