//! WebSocket forwarding.
//!
//! # Responsibilities
//! - Complete the server-side upgrade, then dial the origin
//! - Splice frames in both directions, one frame at a time
//! - Keep the client alive with pings; close idle connections
//!
//! # Design Decisions
//! - Two pumps under tokio::select!; ending either cancels the other,
//!   which drops and closes both sockets
//! - Each pump reads one frame then writes it, so a blocked writer
//!   back-pressures the reader (no unbounded queue)
//! - A normal close from either side is not a breaker failure; a dial
//!   failure or an upstream read error is

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message as TgMessage};

use crate::balancer::Backend;
use crate::breaker::CircuitBreaker;
use crate::config::WsConfig;
use crate::observability::metrics;
use crate::proxy::{forwarded_headers, ForwardContext};

/// Handle a WebSocket upgrade request and splice it to the origin.
pub async fn handle_upgrade(
    ws: WebSocketUpgrade,
    backend: Arc<Backend>,
    breaker: Arc<CircuitBreaker>,
    ctx: &ForwardContext,
    config: WsConfig,
    request: Request<Body>,
) -> Response<Body> {
    if let Err(open) = breaker.try_acquire() {
        tracing::warn!(origin = %open.origin, "Circuit open, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable")
            .into_response();
    }

    let upstream_request = match build_upstream_request(&backend, ctx, &request) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(origin = %backend.id, error = %e, "Failed to build upstream upgrade");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal proxy error").into_response();
        }
    };

    let origin = backend.id.clone();
    ws.on_upgrade(move |socket| async move {
        metrics::record_long_lived("websocket", 1);
        splice(socket, upstream_request, origin, breaker, config).await;
        metrics::record_long_lived("websocket", -1);
    })
}

/// Build the upstream upgrade request: ws/wss scheme, same path and query,
/// inbound headers minus hop-by-hop and handshake-owned ones.
fn build_upstream_request(
    backend: &Backend,
    ctx: &ForwardContext,
    request: &Request<Body>,
) -> Result<tungstenite::handshake::client::Request, tungstenite::Error> {
    let scheme = match backend.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}://{}{}", scheme, backend.authority(), path_and_query);

    let mut upstream_request = url.into_client_request()?;
    for (name, value) in forwarded_headers(request.headers(), ctx).iter() {
        let lower = name.as_str();
        // The client handshake owns these.
        if lower == "connection" || lower == "upgrade" || lower.starts_with("sec-websocket-") {
            continue;
        }
        upstream_request.headers_mut().append(name.clone(), value.clone());
    }
    Ok(upstream_request)
}

/// Dial the origin, then run both pumps until either side finishes.
async fn splice(
    client_ws: WebSocket,
    upstream_request: tungstenite::handshake::client::Request,
    origin: String,
    breaker: Arc<CircuitBreaker>,
    config: WsConfig,
) {
    let (upstream, _) = match connect_async(upstream_request).await {
        Ok(pair) => {
            breaker.on_success();
            pair
        }
        Err(e) => {
            tracing::error!(origin = %origin, error = %e, "Upstream WebSocket dial failed");
            metrics::record_upstream_failure(&origin, "dial");
            breaker.on_failure();
            let mut client_ws = client_ws;
            let _ = client_ws
                .send(Message::Close(Some(CloseFrame {
                    code: 1011,
                    reason: "upstream unavailable".into(),
                })))
                .await;
            return;
        }
    };

    let ping_interval = Duration::from_millis(config.ping_interval_ms);
    let idle_timeout = Duration::from_millis(config.idle_timeout_ms);
    let last_activity = Arc::new(Mutex::new(Instant::now()));

    let (mut u_sink, mut u_stream) = upstream.split();
    let (mut c_sink, mut c_stream) = client_ws.split();

    let c2u = {
        let last_activity = last_activity.clone();
        let breaker = breaker.clone();
        let origin = origin.clone();
        async move {
            while let Some(Ok(msg)) = c_stream.next().await {
                *last_activity.lock().expect("ws activity mutex poisoned") = Instant::now();
                let closing = matches!(msg, Message::Close(_));
                if u_sink.send(to_upstream(msg)).await.is_err() {
                    if !closing {
                        tracing::warn!(origin = %origin, "Upstream WebSocket write failed");
                        metrics::record_upstream_failure(&origin, "write");
                        breaker.on_failure();
                    }
                    break;
                }
                if closing {
                    break;
                }
            }
        }
    };

    let u2c = {
        let last_activity = last_activity.clone();
        let breaker = breaker.clone();
        let origin = origin.clone();
        async move {
            let mut ping = tokio::time::interval(ping_interval);
            ping.tick().await; // the first tick fires immediately

            loop {
                let idle_deadline = *last_activity.lock().expect("ws activity mutex poisoned")
                    + idle_timeout;
                tokio::select! {
                    frame = u_stream.next() => match frame {
                        Some(Ok(msg)) => {
                            *last_activity.lock().expect("ws activity mutex poisoned") =
                                Instant::now();
                            let closing = matches!(msg, TgMessage::Close(_));
                            let Some(out) = to_client(msg) else { continue };
                            if c_sink.send(out).await.is_err() {
                                if !closing {
                                    metrics::record_client_abort(&origin);
                                    breaker.on_failure();
                                }
                                break;
                            }
                            if closing {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(origin = %origin, error = %e, "Upstream WebSocket error");
                            metrics::record_upstream_failure(&origin, "stream");
                            breaker.on_failure();
                            break;
                        }
                        None => break,
                    },
                    _ = ping.tick() => {
                        if c_sink.send(Message::Ping(Bytes::new())).await.is_err() {
                            metrics::record_client_abort(&origin);
                            breaker.on_failure();
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(idle_deadline)) => {
                        let _ = c_sink
                            .send(Message::Close(Some(CloseFrame {
                                code: 1001,
                                reason: "idle timeout".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }
    };

    // Ending either pump cancels the other and closes both sockets.
    tokio::select! {
        _ = c2u => {},
        _ = u2c => {},
    }
    tracing::debug!(origin = %origin, "WebSocket exchange finished");
}

fn to_upstream(msg: Message) -> TgMessage {
    match msg {
        Message::Text(t) => TgMessage::Text(t.to_string().into()),
        Message::Binary(b) => TgMessage::Binary(b),
        Message::Ping(p) => TgMessage::Ping(p),
        Message::Pong(p) => TgMessage::Pong(p),
        Message::Close(c) => TgMessage::Close(c.map(|cf| tungstenite::protocol::CloseFrame {
            code: cf.code.into(),
            reason: cf.reason.to_string().into(),
        })),
    }
}

fn to_client(msg: TgMessage) -> Option<Message> {
    match msg {
        TgMessage::Text(t) => Some(Message::Text(t.to_string().into())),
        TgMessage::Binary(b) => Some(Message::Binary(b)),
        TgMessage::Ping(p) => Some(Message::Ping(p)),
        TgMessage::Pong(p) => Some(Message::Pong(p)),
        TgMessage::Close(c) => Some(Message::Close(c.map(|cf| CloseFrame {
            code: cf.code.into(),
            reason: cf.reason.to_string().into(),
        }))),
        _ => None,
    }
}
