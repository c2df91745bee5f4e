//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as TgMessage;

use edgegate::config::{OriginConfig, ProxyConfig};
use edgegate::lifecycle::Shutdown;
use edgegate::proxy::ProxyServer;

/// Build a config fronting the given origins as b1, b2, ...
pub fn base_config(origins: &[SocketAddr]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    for (i, addr) in origins.iter().enumerate() {
        config.origins.push(OriginConfig {
            id: format!("b{}", i + 1),
            url: format!("http://{}", addr),
            weight: 1,
            health_path: "/health".into(),
        });
    }
    config
}

/// Start the proxy on an ephemeral port; returns its address and the
/// shutdown coordinator keeping it alive.
pub async fn spawn_proxy(config: ProxyConfig) -> (SocketAddr, Shutdown) {
    spawn_proxy_with_metrics(config, None).await
}

/// Same, with an optional installed metrics handle.
pub async fn spawn_proxy_with_metrics(
    config: ProxyConfig,
    metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = ProxyServer::new(config, metrics).unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}

/// Start a simple mock origin that returns a fixed 200 response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a programmable mock origin with async support.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let _ = read_head(&mut socket).await;
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a mock origin that echoes the received request head and body back
/// as the response body, so tests can assert on forwarded headers.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut captured = read_head(&mut socket).await;
                        // Drain whatever body arrives shortly after the head.
                        let mut buf = [0u8; 4096];
                        while let Ok(Ok(n)) = tokio::time::timeout(
                            Duration::from_millis(150),
                            socket.read(&mut buf),
                        )
                        .await
                        {
                            if n == 0 {
                                break;
                            }
                            captured.extend_from_slice(&buf[..n]);
                        }

                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            captured.len()
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.write_all(&captured).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a WebSocket origin that answers text frames with "Echo: <text>".
/// Sets `closed` once its read loop ends.
pub async fn start_ws_echo_backend(closed: Arc<AtomicBool>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let closed = closed.clone();
                    tokio::spawn(async move {
                        let ws = match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws) => ws,
                            Err(_) => return,
                        };
                        let (mut sink, mut stream) = ws.split();
                        while let Some(Ok(msg)) = stream.next().await {
                            match msg {
                                TgMessage::Text(t) => {
                                    let reply = format!("Echo: {}", t.as_str());
                                    if sink.send(TgMessage::Text(reply.into())).await.is_err() {
                                        break;
                                    }
                                }
                                TgMessage::Close(frame) => {
                                    let _ = sink.send(TgMessage::Close(frame)).await;
                                    break;
                                }
                                _ => {}
                            }
                        }
                        closed.store(true, std::sync::atomic::Ordering::SeqCst);
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Event with a pause before it is written, for the SSE origin.
pub struct SseEvent {
    pub delay: Duration,
    pub payload: &'static str,
}

/// Start an SSE origin that streams the given events and then closes.
pub async fn start_sse_backend(events: Vec<SseEvent>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let events = Arc::new(events);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let events = events.clone();
                    tokio::spawn(async move {
                        let _ = read_head(&mut socket).await;
                        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
                        if socket.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        for event in events.iter() {
                            tokio::time::sleep(event.delay).await;
                            if socket.write_all(event.payload.as_bytes()).await.is_err() {
                                return;
                            }
                            let _ = socket.flush().await;
                        }
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Send a raw HTTP/1.1 request and return the full response text.
/// Bypasses client-side URL normalization (needed for `..` paths).
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read from the socket until the end of the request head.
async fn read_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut buf = [0u8; 2048];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                head.extend_from_slice(&buf[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    head
}
