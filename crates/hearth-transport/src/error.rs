use std::net::SocketAddr;

use thiserror::Error;

use crate::connection::ConnectionId;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid listen address `{0}`")]
    InvalidAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The connection is closed or its socket task has exited.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
