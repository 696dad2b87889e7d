//! Worker threads and process lifecycle.
//!
//! Each worker is an OS thread driving its own current-thread tokio runtime.
//! Request workers accept on clones of the listeners bound once here; task
//! workers run their start callbacks and then idle until shutdown.

use std::net::SocketAddr;
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;

use hearth_transport::Listeners;
use tokio::sync::watch;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;

struct WorkerThread {
    ordinal: usize,
    handle: JoinHandle<Result<(), ServerError>>,
}

/// A running server. Dropping it signals shutdown without waiting.
pub struct ServerHandle {
    http_addr: SocketAddr,
    udp_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    threads: Vec<WorkerThread>,
}

impl ServerHandle {
    /// Address the HTTP/WebSocket listener is bound to.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Address of the UDP endpoint, if it is enabled and bound.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn worker_count(&self) -> usize {
        self.threads.len()
    }

    /// Signal every worker to stop and wait for their threads to exit.
    ///
    /// Blocks the calling thread. Returns the first worker error, if any.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.shutdown_tx.send_replace(true);

        let mut first_error = None;
        for thread in std::mem::take(&mut self.threads) {
            let outcome = match thread.handle.join() {
                Ok(result) => result,
                Err(_) => Err(ServerError::WorkerPanicked {
                    ordinal: thread.ordinal,
                }),
            };
            if let Err(e) = outcome {
                error!(worker = thread.ordinal, "Worker exited with error: {e}");
                first_error.get_or_insert(e);
            }
        }

        info!("Server stopped");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("http_addr", &self.http_addr)
            .field("udp_addr", &self.udp_addr)
            .field("workers", &self.threads.len())
            .finish()
    }
}

impl Dispatcher {
    /// Bind the listeners, start every worker, and wait until all of them
    /// have finished their start callbacks.
    ///
    /// If any worker fails to start, the others are stopped and that
    /// worker's error is returned.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        self.config.validate()?;

        let listeners = Listeners::bind(&self.config.transport())?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut server = ServerHandle {
            http_addr: listeners.http_addr()?,
            udp_addr: listeners.udp_addr(),
            shutdown_tx,
            threads: Vec::new(),
        };

        let total = self.config.total_workers();
        let request_workers = self.config.workers;
        let dispatcher = Arc::new(self);
        let (ready_tx, ready_rx) = mpsc::channel();

        for ordinal in 0..total {
            let worker_listeners = if ordinal < request_workers {
                match listeners.try_clone() {
                    Ok(l) => Some(l),
                    Err(e) => {
                        let _ = server.shutdown();
                        return Err(e.into());
                    }
                }
            } else {
                None
            };

            let dispatcher = dispatcher.clone();
            let shutdown = shutdown_rx.clone();
            let ready = ready_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("hearth-worker-{ordinal}"))
                .spawn(move || run_worker(dispatcher, ordinal, worker_listeners, shutdown, ready));

            match spawned {
                Ok(handle) => server.threads.push(WorkerThread { ordinal, handle }),
                Err(e) => {
                    let _ = server.shutdown();
                    return Err(e.into());
                }
            }
        }
        drop(ready_tx);
        drop(listeners);

        for _ in 0..total {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = server.shutdown();
                    return Err(e);
                }
                Err(_) => {
                    // A worker died before reporting; its join result says why
                    return match server.shutdown() {
                        Err(e) => Err(e),
                        Ok(()) => Err(ServerError::StartupAborted),
                    };
                }
            }
        }

        info!(
            "Hearth running on {} with {} request and {} task workers",
            server.http_addr,
            request_workers,
            total - request_workers
        );
        Ok(server)
    }

    /// Run until Ctrl-C, then shut down gracefully.
    pub fn start(self) -> Result<(), ServerError> {
        let server = self.spawn()?;

        let signals = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        signals.block_on(tokio::signal::ctrl_c())?;

        info!("Shutting down...");
        server.shutdown()
    }
}

fn run_worker(
    dispatcher: Arc<Dispatcher>,
    ordinal: usize,
    listeners: Option<Listeners>,
    mut shutdown: watch::Receiver<bool>,
    ready: mpsc::Sender<Result<(), ServerError>>,
) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let worker = match dispatcher.boot_worker(ordinal).await {
            Ok(worker) => {
                let _ = ready.send(Ok(()));
                worker
            }
            Err(e) => {
                error!(worker = ordinal, "Worker failed to start: {e}");
                let _ = ready.send(Err(e));
                return Ok(());
            }
        };
        drop(ready);

        match listeners {
            Some(listeners) => {
                let sink = Arc::new(dispatcher.worker_dispatch(worker));
                let transport = dispatcher.config.transport();
                hearth_transport::serve(listeners, transport, sink, shutdown).await?;
            }
            None => {
                // Jobs the start callbacks spawned keep running on this runtime
                let _ = shutdown.wait_for(|stop| *stop).await;
                drop(worker);
            }
        }

        info!(worker = ordinal, "Worker stopped");
        Ok(())
    })
}
