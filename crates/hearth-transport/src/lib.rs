//! Hearth Transport Layer
//!
//! Provides the HTTP, WebSocket and UDP endpoints for a Hearth worker.
//! The transport layer handles:
//! - Binding listeners once and sharing them across workers
//! - WebSocket connection lifecycle (open, message, close)
//! - Outbound pushes and close requests from handlers
//! - UDP datagram intake
//!
//! The transport is decoupled from dispatch via the `EventSink` trait.

pub mod connection;
pub mod error;
pub mod server;

pub use connection::{
    Connection, ConnectionId, ConnectionState, Datagram, Frame, Handshake, Outbound,
};
pub use error::TransportError;
pub use server::{EventSink, Listeners, TransportConfig, serve};
