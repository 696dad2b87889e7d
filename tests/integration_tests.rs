//! End-to-end integration tests — real listeners, worker threads, HTTP,
//! WebSocket and UDP traffic through a running server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use hearth_protocol::context;
use hearth_server::{Dispatcher, ServerConfig, ServerError, ServerHandle, Worker};
use hearth_transport::{Connection, Datagram, Frame};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0, // OS-assigned
        ..ServerConfig::default()
    }
}

/// Start a server on a random port with the handlers `configure` registers.
fn start_test_server(
    config: ServerConfig,
    configure: impl FnOnce(&mut Dispatcher),
) -> ServerHandle {
    let mut dispatcher = Dispatcher::new(config);
    configure(&mut dispatcher);
    dispatcher.spawn().expect("server should start")
}

async fn stop(server: ServerHandle) {
    tokio::task::spawn_blocking(move || server.shutdown())
        .await
        .unwrap()
        .unwrap();
}

async fn connect(server: &ServerHandle) -> WsStream {
    let url = format!("ws://{}/ws", server.http_addr());
    let (ws, _) = connect_async(&url).await.expect("Failed to connect");
    ws
}

async fn next_message(ws: &mut WsStream) -> Message {
    timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("Timeout waiting for message")
        .expect("Stream ended")
        .expect("WebSocket error")
}

async fn next_json(ws: &mut WsStream) -> Value {
    let text = next_message(ws).await.into_text().unwrap();
    serde_json::from_str(text.as_str()).unwrap()
}

async fn routes(worker: Worker, request: Request) -> anyhow::Result<Response> {
    match request.uri().path() {
        "/health" => Ok(axum::Json(json!({
            "status": "ok",
            "worker": worker.identity().ordinal,
        }))
        .into_response()),
        "/context" => Ok(axum::Json(json!({"request_id": context::request_id()})).into_response()),
        "/boom" => anyhow::bail!("ledger is locked"),
        _ => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn echo(_worker: Worker, conn: Connection, frame: Frame) -> anyhow::Result<()> {
    if frame.as_text() == Some("fail") {
        anyhow::bail!("cannot handle fail");
    }
    conn.send(frame)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_works() {
    let server = start_test_server(test_config(), |d| {
        d.on_request(routes);
    });

    let url = format!("http://{}/health", server.http_addr());
    let resp = reqwest::get(&url).await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["worker"], 0);

    stop(server).await;
}

#[tokio::test]
async fn failing_request_returns_500_json() {
    let server = start_test_server(test_config(), |d| {
        d.on_request(routes);
    });

    let url = format!("http://{}/boom", server.http_addr());
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({"error": "Internal Server Error", "message": "ledger is locked"})
    );

    // Same worker still serves the next request
    let url = format!("http://{}/health", server.http_addr());
    assert!(reqwest::get(&url).await.unwrap().status().is_success());

    stop(server).await;
}

#[tokio::test]
async fn request_ids_differ_between_requests() {
    let server = start_test_server(test_config(), |d| {
        d.on_request(routes);
    });

    let url = format!("http://{}/context", server.http_addr());
    let first: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    let second: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert!(first["request_id"].is_string());
    assert_ne!(first["request_id"], second["request_id"]);

    stop(server).await;
}

#[tokio::test]
async fn missing_request_handler_returns_404() {
    let server = start_test_server(test_config(), |_| {});

    let url = format!("http://{}/anything", server.http_addr());
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    stop(server).await;
}

#[tokio::test]
async fn plain_http_on_ws_path_reaches_request_handler() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let server = start_test_server(test_config(), move |d| {
        d.on_request(move |_w, request: Request| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let method = request.method().to_string();
                anyhow::Ok((StatusCode::IM_A_TEAPOT, method).into_response())
            }
        });
    });

    let url = format!("http://{}/ws", server.http_addr());
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 418);
    assert_eq!(resp.text().await.unwrap(), "GET");

    let resp = reqwest::Client::new().post(&url).body("{}").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 418);
    assert_eq!(resp.text().await.unwrap(), "POST");

    assert_eq!(hits.load(Ordering::SeqCst), 2);

    stop(server).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn open_handler_can_push_immediately() {
    let server = start_test_server(test_config(), |d| {
        d.on_connection_open(|_w, conn: Connection| async move {
            conn.send_json(&json!({"type": "welcome", "id": conn.id().to_string()}))?;
            anyhow::Ok(())
        });
    });

    let mut ws = connect(&server).await;
    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["id"].as_str().unwrap().starts_with("conn-"));

    stop(server).await;
}

#[tokio::test]
async fn open_failure_closes_with_1011_and_reason() {
    let server = start_test_server(test_config(), |d| {
        d.on_connection_open(|_w, _conn: Connection| async {
            Err::<(), _>(anyhow::anyhow!("tenant suspended"))
        });
    });

    let mut ws = connect(&server).await;
    match next_message(&mut ws).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1011);
            assert_eq!(frame.reason.as_str(), "tenant suspended");
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    stop(server).await;
}

#[tokio::test]
async fn message_failure_reports_error_and_connection_survives() {
    let server = start_test_server(test_config(), |d| {
        d.on_message(echo);
    });

    let mut ws = connect(&server).await;

    ws.send(Message::Text("fail".into())).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error, json!({"error": "cannot handle fail"}));

    ws.send(Message::Text("still here".into())).await.unwrap();
    let echoed = next_message(&mut ws).await.into_text().unwrap();
    assert_eq!(echoed.as_str(), "still here");

    stop(server).await;
}

#[tokio::test]
async fn messages_are_handled_in_arrival_order() {
    let server = start_test_server(test_config(), |d| {
        d.on_message(echo);
    });

    let mut ws = connect(&server).await;
    for i in 0..10 {
        ws.send(Message::Text(format!("msg-{i}").into())).await.unwrap();
    }
    for i in 0..10 {
        let text = next_message(&mut ws).await.into_text().unwrap();
        assert_eq!(text.as_str(), format!("msg-{i}"));
    }

    stop(server).await;
}

#[tokio::test]
async fn binary_frames_round_trip() {
    let server = start_test_server(test_config(), |d| {
        d.on_message(echo);
    });

    let mut ws = connect(&server).await;
    ws.send(Message::Binary(vec![0u8, 1, 2, 255].into())).await.unwrap();
    match next_message(&mut ws).await {
        Message::Binary(data) => assert_eq!(&data[..], &[0u8, 1, 2, 255]),
        other => panic!("expected binary frame, got {other:?}"),
    }

    stop(server).await;
}

#[tokio::test]
async fn close_handler_runs_after_disconnect() {
    let (closed_tx, mut closed_rx) = tokio::sync::mpsc::unbounded_channel();
    let server = start_test_server(test_config(), move |d| {
        d.on_connection_close(move |worker: Worker, id| {
            let closed_tx = closed_tx.clone();
            async move {
                let _ = closed_tx.send((id, worker.connection_count()));
                anyhow::Ok(())
            }
        });
    });

    let mut ws = connect(&server).await;
    ws.close(None).await.unwrap();

    let (id, remaining) = timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(id.to_string().starts_with("conn-"));
    assert_eq!(remaining, 0);

    stop(server).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// UDP
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn udp_datagrams_reach_the_handler() {
    let config = ServerConfig {
        enable_udp: true,
        udp_port: 0,
        ..test_config()
    };
    let server = start_test_server(config, |d| {
        d.on_datagram(|_w, datagram: Datagram| async move {
            let mut reply = b"ack:".to_vec();
            reply.extend_from_slice(&datagram.payload);
            datagram.reply(&reply).await?;
            anyhow::Ok(())
        });
    });

    let udp_addr = server.udp_addr().expect("UDP should be enabled");
    let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"ping", udp_addr).await.unwrap();

    let mut buf = [0u8; 64];
    let (n, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"ack:ping");

    stop(server).await;
}

#[tokio::test]
async fn udp_bind_failure_keeps_http_running() {
    let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let config = ServerConfig {
        enable_udp: true,
        udp_port: taken.local_addr().unwrap().port(),
        ..test_config()
    };
    let server = start_test_server(config, |d| {
        d.on_request(routes);
    });

    assert!(server.udp_addr().is_none());
    let url = format!("http://{}/health", server.http_addr());
    assert!(reqwest::get(&url).await.unwrap().status().is_success());

    stop(server).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_and_task_workers_all_start() {
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
    let config = ServerConfig {
        workers: 2,
        task_workers: 1,
        ..test_config()
    };
    let server = start_test_server(config, move |d| {
        d.add_worker_start_callback(move |worker: Worker| {
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send((worker.identity().ordinal, worker.role()));
                anyhow::Ok(())
            }
        });
        d.on_request(routes);
    });
    assert_eq!(server.worker_count(), 3);

    let mut started = Vec::new();
    for _ in 0..3 {
        started.push(started_rx.recv().await.unwrap());
    }
    started.sort_by_key(|(ordinal, _)| *ordinal);
    assert_eq!(
        started,
        vec![
            (0, hearth_protocol::WorkerRole::Request),
            (1, hearth_protocol::WorkerRole::Request),
            (2, hearth_protocol::WorkerRole::Task),
        ]
    );

    let url = format!("http://{}/health", server.http_addr());
    assert!(reqwest::get(&url).await.unwrap().status().is_success());

    stop(server).await;
}

#[test]
fn failing_start_callback_fails_spawn() {
    let mut dispatcher = Dispatcher::new(test_config());
    dispatcher.add_worker_start_callback(|_w: Worker| async {
        Err::<(), _>(anyhow::anyhow!("migrations missing"))
    });

    let err = dispatcher.spawn().unwrap_err();
    assert!(matches!(err, ServerError::WorkerStart { ordinal: 0, index: 0, .. }));
}

#[test]
fn zero_request_workers_is_rejected() {
    let config = ServerConfig {
        workers: 0,
        ..test_config()
    };
    let err = Dispatcher::new(config).spawn().unwrap_err();
    assert!(matches!(err, ServerError::InvalidConfig(_)));
}
