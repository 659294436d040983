//! End-to-end streaming tests against a real server on an ephemeral port.

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use audio_ingest_backend::config::AppConfig;
use audio_ingest_backend::handlers::configure_routes;
use audio_ingest_backend::middleware::MetricsMiddleware;
use audio_ingest_backend::sink::MemorySink;
use audio_ingest_backend::state::AppState;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn start_server(state: AppState) -> (SocketAddr, ServerHandle) {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(MetricsMiddleware)
            .configure(configure_routes)
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);
    (addr, handle)
}

fn memory_state() -> (AppState, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (AppState::new(AppConfig::default(), sink.clone()), sink)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws/audio", addr))
        .await
        .unwrap();
    client
}

/// Next text frame, skipping keep-alive traffic.
async fn next_text(client: &mut Client) -> serde_json::Value {
    loop {
        match timeout(WAIT, client.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

/// Read until the server's close frame (or end of stream) and return its code.
async fn next_close(client: &mut Client) -> Option<CloseCode> {
    loop {
        match timeout(WAIT, client.next()).await.unwrap() {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

async fn wait_for_connections(state: &AppState, expected: usize) {
    let deadline = Instant::now() + WAIT;
    while state.registry.count() != expected {
        assert!(
            Instant::now() < deadline,
            "registry count stuck at {}, expected {}",
            state.registry.count(),
            expected
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[actix_web::test]
async fn test_three_chunks_then_close() {
    let (state, sink) = memory_state();
    let (addr, server) = start_server(state.clone());
    let before = state.registry.count();

    let mut client = connect(addr).await;
    wait_for_connections(&state, before + 1).await;

    for (i, size) in [4096usize, 4096, 10].into_iter().enumerate() {
        client
            .send(Message::Binary(vec![i as u8; size]))
            .await
            .unwrap();
    }

    let mut acked = Vec::new();
    for _ in 0..3 {
        let ack = next_text(&mut client).await;
        assert_eq!(ack["status"], "received");
        assert!(ack["timestamp"].is_string());
        acked.push(ack["bytes"].as_u64().unwrap());
    }
    assert_eq!(acked, vec![4096, 4096, 10]);

    client.close(None).await.unwrap();
    next_close(&mut client).await;
    wait_for_connections(&state, before).await;

    let entries = sink.entries().await;
    let sizes: Vec<usize> = entries.iter().map(|(_, bytes)| bytes.len()).collect();
    assert_eq!(sizes, vec![4096, 4096, 10]);
    assert_eq!(sizes.iter().sum::<usize>(), 8202);
    assert!(entries[0].0.starts_with("stream_"));
    assert!(entries[0].0.ends_with("_00000000.raw"));
    assert!(entries[2].0.ends_with("_00000002.raw"));
    assert!(entries[1].1.iter().all(|&b| b == 1));

    server.stop(true).await;
}

#[actix_web::test]
async fn test_empty_frame_ends_stream() {
    let (state, sink) = memory_state();
    let (addr, server) = start_server(state.clone());

    let mut client = connect(addr).await;
    client.send(Message::Binary(b"pcm".to_vec())).await.unwrap();
    assert_eq!(next_text(&mut client).await["bytes"], 3);

    client.send(Message::Binary(Vec::new())).await.unwrap();
    assert_eq!(next_close(&mut client).await, Some(CloseCode::Normal));
    wait_for_connections(&state, 0).await;
    assert_eq!(sink.len().await, 1);

    server.stop(true).await;
}

#[actix_web::test]
async fn test_text_frames_get_error_notice() {
    let (state, sink) = memory_state();
    let (addr, server) = start_server(state.clone());

    let mut client = connect(addr).await;
    client
        .send(Message::Text("hello".to_string()))
        .await
        .unwrap();
    let notice = next_text(&mut client).await;
    assert_eq!(notice["type"], "error");
    assert_eq!(notice["code"], "unsupported_message");

    // The connection is still usable afterwards.
    client.send(Message::Binary(vec![9; 16])).await.unwrap();
    assert_eq!(next_text(&mut client).await["bytes"], 16);
    assert_eq!(sink.len().await, 1);

    client.close(None).await.unwrap();
    next_close(&mut client).await;
    server.stop(true).await;
}

#[actix_web::test]
async fn test_disconnect_does_not_affect_other_connection() {
    let (state, sink) = memory_state();
    let (addr, server) = start_server(state.clone());

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    wait_for_connections(&state, 2).await;

    first.send(Message::Binary(vec![1; 8])).await.unwrap();
    assert_eq!(next_text(&mut first).await["bytes"], 8);
    drop(first);
    wait_for_connections(&state, 1).await;

    for size in [100usize, 200, 300] {
        second.send(Message::Binary(vec![2; size])).await.unwrap();
        assert_eq!(next_text(&mut second).await["bytes"], size as u64);
    }

    let second_sizes: Vec<usize> = sink
        .entries()
        .await
        .into_iter()
        .filter(|(_, bytes)| bytes.iter().all(|&b| b == 2))
        .map(|(_, bytes)| bytes.len())
        .collect();
    assert_eq!(second_sizes, vec![100, 200, 300]);

    second.close(None).await.unwrap();
    next_close(&mut second).await;
    wait_for_connections(&state, 0).await;
    server.stop(true).await;
}

#[actix_web::test]
async fn test_diagnostics_see_live_connection() {
    let (state, _) = memory_state();
    let (addr, server) = start_server(state.clone());

    let mut client = connect(addr).await;
    wait_for_connections(&state, 1).await;

    let snapshot = state.registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(state.stats.snapshot().connections_total, 1);

    client.close(None).await.unwrap();
    next_close(&mut client).await;
    wait_for_connections(&state, 0).await;
    server.stop(true).await;
}
