//! Hearth — multi-protocol event server.
//!
//! Serves HTTP requests, WebSocket connections and (optionally) UDP datagrams
//! from a pool of worker threads. This binary wires a small demonstration
//! application onto the dispatcher.
//!
//! Usage:
//!   hearth                                 # 127.0.0.1:8080, one worker
//!   hearth --config config/                # Load every .json/.toml in a directory
//!   hearth --port 9000 --workers 4         # Custom port and pool size
//!   hearth --udp-port 9001                 # Enable the UDP endpoint

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::{
    Json,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use clap::Parser;
use hearth_protocol::{Config, WorkerRole, context};
use hearth_server::{Dispatcher, InMemoryMetrics, ServerConfig, Worker};
use hearth_transport::{Connection, ConnectionId, Datagram, Frame};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hearth", about = "Hearth — HTTP, WebSocket and UDP event server")]
struct Cli {
    /// Config file or directory (.json / .toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hostname to bind to (overrides `server.host`)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, 0 for OS-assigned (overrides `server.port`)
    #[arg(long)]
    port: Option<u16>,

    /// Enable the UDP endpoint on this port
    #[arg(long)]
    udp_port: Option<u16>,

    /// Number of request workers
    #[arg(long)]
    workers: Option<usize>,

    /// Number of background task workers
    #[arg(long)]
    task_workers: Option<usize>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port) = self.udp_port {
            config.enable_udp = true;
            config.udp_port = port;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(task_workers) = self.task_workers {
            config.task_workers = task_workers;
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(log_path) = &cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let settings = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::empty(),
    };
    let mut config = ServerConfig::from_config(&settings)?;
    cli.apply(&mut config);

    println!();
    println!("  Hearth");
    println!("  HTTP:       http://{}:{}", config.host, config.port);
    println!("  WebSocket:  ws://{}:{}{}", config.host, config.port, config.ws_path);
    if config.enable_udp {
        println!("  UDP:        {}:{}", config.host, config.udp_port);
    } else {
        println!("  UDP:        disabled");
    }
    println!("  Workers:    {} request, {} task", config.workers, config.task_workers);
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    let metrics = Arc::new(InMemoryMetrics::new());
    let mut dispatcher = Dispatcher::new(config)
        .with_settings(settings)
        .with_metrics(metrics.clone());

    dispatcher
        .add_worker_start_callback(move |worker: Worker| {
            let metrics = metrics.clone();
            async move {
                worker.registry().instance("metrics", metrics);
                let greeting = worker
                    .config()
                    .get_as::<String>("app.greeting")
                    .unwrap_or_else(|| "hello from hearth".into());
                worker
                    .registry()
                    .singleton("greeting", move |_| anyhow::Ok(greeting.clone()));
                anyhow::Ok(())
            }
        })
        .add_worker_start_callback(start_heartbeat)
        .on_request(handle_request)
        .on_connection_open(handle_open)
        .on_message(handle_message)
        .on_connection_close(handle_close)
        .on_datagram(handle_datagram);

    dispatcher.start()?;
    println!("  Server stopped.");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Demonstration handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn start_heartbeat(worker: Worker) -> anyhow::Result<()> {
    if worker.role() != WorkerRole::Task {
        return Ok(());
    }
    let interval = worker.config().get_as::<u64>("app.heartbeat_secs").unwrap_or(60);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
        loop {
            ticker.tick().await;
            info!("{} heartbeat", worker.identity());
        }
    });
    Ok(())
}

async fn handle_request(worker: Worker, request: Request) -> anyhow::Result<Response> {
    let response = match request.uri().path() {
        "/health" => Json(json!({
            "status": "ok",
            "worker": worker.identity().ordinal,
            "connections": worker.connection_count(),
        }))
        .into_response(),
        "/metrics" => worker.make::<InMemoryMetrics>("metrics")?.render().into_response(),
        "/context" => Json(json!({
            "correlation_id": context::correlation_id(),
            "request_id": context::request_id(),
        }))
        .into_response(),
        "/greeting" => worker.make::<String>("greeting")?.as_str().to_owned().into_response(),
        "/fail" => anyhow::bail!("requested failure"),
        _ => StatusCode::NOT_FOUND.into_response(),
    };
    Ok(response)
}

async fn handle_open(worker: Worker, conn: Connection) -> anyhow::Result<()> {
    conn.send_json(&json!({
        "type": "welcome",
        "connection": conn.id().to_string(),
        "worker": worker.identity().ordinal,
    }))?;
    Ok(())
}

/// Echo frames back. `broadcast <text>` fans out to every connection on
/// this worker.
async fn handle_message(worker: Worker, conn: Connection, frame: Frame) -> anyhow::Result<()> {
    if let Some(text) = frame.as_text().and_then(|t| t.strip_prefix("broadcast ")) {
        let sent = worker.broadcast(text.to_owned());
        debug!("Broadcast from {} reached {sent} connections", conn.id());
        return Ok(());
    }
    if frame.as_text() == Some("fail") {
        anyhow::bail!("requested failure");
    }
    conn.send(frame)?;
    Ok(())
}

async fn handle_close(worker: Worker, id: ConnectionId) -> anyhow::Result<()> {
    debug!("{id} closed, {} connections remain", worker.connection_count());
    Ok(())
}

async fn handle_datagram(_worker: Worker, datagram: Datagram) -> anyhow::Result<()> {
    datagram.reply(&datagram.payload).await?;
    Ok(())
}
