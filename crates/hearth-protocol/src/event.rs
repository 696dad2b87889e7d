//! Event kinds and the failure-recovery table applied at the dispatch boundary.

use std::fmt;

/// WebSocket close codes used by the dispatcher and transport.
pub mod close_code {
    pub const GOING_AWAY: u16 = 1001;
    /// The peer sent a close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// No close frame was received from the peer.
    pub const ABNORMAL: u16 = 1006;
    /// The server hit an unexpected condition.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Every kind of event the dispatcher routes to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Request,
    ConnectionOpen,
    Message,
    ConnectionClose,
    Datagram,
    WorkerStart,
}

impl EventKind {
    /// Stable snake_case label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::Request => "request",
            EventKind::ConnectionOpen => "connection_open",
            EventKind::Message => "message",
            EventKind::ConnectionClose => "connection_close",
            EventKind::Datagram => "datagram",
            EventKind::WorkerStart => "worker_start",
        }
    }

    /// What the dispatcher does when a handler of this kind fails.
    pub fn recovery(&self) -> Recovery {
        match self {
            EventKind::Request => Recovery::RespondWithErrorBody,
            EventKind::ConnectionOpen => Recovery::TerminateConnection {
                code: close_code::INTERNAL_ERROR,
            },
            EventKind::Message => Recovery::NotifyThenDiscard,
            EventKind::ConnectionClose => Recovery::SilentDiscard,
            EventKind::Datagram => Recovery::LogOnly,
            EventKind::WorkerStart => Recovery::Fatal,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Recovery strategy for a failed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Answer with status 500 and an [`InternalErrorBody`](crate::InternalErrorBody).
    RespondWithErrorBody,
    /// Close the connection with `code`, failure text as reason.
    TerminateConnection { code: u16 },
    /// Send a [`MessageErrorBody`](crate::MessageErrorBody) back; ignore send failures.
    NotifyThenDiscard,
    SilentDiscard,
    LogOnly,
    /// Not contained: the failure propagates to the caller.
    Fatal,
}
