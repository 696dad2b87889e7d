//! Worker identity and role classification.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Serves HTTP, WebSocket and UDP events.
    Request,
    /// Background worker; runs startup callbacks, never accepts traffic.
    Task,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Request => f.write_str("request worker"),
            WorkerRole::Task => f.write_str("task worker"),
        }
    }
}

/// Position of one worker among all workers spawned by the process.
///
/// Ordinals `0..request_workers` are request workers, the rest task workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub ordinal: usize,
    pub request_workers: usize,
}

impl WorkerIdentity {
    pub fn new(ordinal: usize, request_workers: usize) -> Self {
        Self {
            ordinal,
            request_workers,
        }
    }

    pub fn role(&self) -> WorkerRole {
        if self.ordinal < self.request_workers {
            WorkerRole::Request
        } else {
            WorkerRole::Task
        }
    }

    pub fn is_request_worker(&self) -> bool {
        self.role() == WorkerRole::Request
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.role(), self.ordinal)
    }
}
