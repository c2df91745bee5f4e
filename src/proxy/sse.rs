//! Server-Sent Events forwarding.
//!
//! # Responsibilities
//! - Open the upstream GET and check it accepted the stream
//! - Relay event bytes in arrival order
//! - Inject the initial retry directive and periodic heartbeats
//!
//! # Design Decisions
//! - One relay task owns all writes to the client, so heartbeat comments
//!   can never land mid-event; heartbeats are additionally gated on the
//!   last chunk ending at an event boundary (`\n\n`)
//! - Upstream non-2xx is a 502 and a breaker failure
//! - The relay stops when either side fails; dropping the channel ends
//!   the client body

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyDataStream, BodyExt};
use hyper::body::Incoming;
use tokio::sync::mpsc;

use crate::balancer::Backend;
use crate::breaker::{CircuitBreaker, Verdict};
use crate::config::SseConfig;
use crate::observability::metrics;
use crate::proxy::http::{dial, UpstreamClient};
use crate::proxy::{forwarded_headers, ForwardContext, ForwardError};

/// Forward one event-stream exchange to `backend`, gated by `breaker`.
pub async fn forward(
    client: &UpstreamClient,
    backend: Arc<Backend>,
    breaker: Arc<CircuitBreaker>,
    ctx: &ForwardContext,
    config: SseConfig,
    upstream_timeout: Duration,
    inbound_headers: &HeaderMap,
    path_and_query: &str,
) -> Response<Body> {
    let uri = format!(
        "{}://{}{}",
        backend.scheme(),
        backend.authority(),
        path_and_query
    );

    let mut headers = forwarded_headers(inbound_headers, ctx);
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

    let upstream_req = match Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
    {
        Ok(mut req) => {
            *req.headers_mut() = headers;
            req
        }
        Err(e) => {
            tracing::error!(origin = %backend.id, error = %e, "Failed to build upstream request");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal proxy error").into_response();
        }
    };

    let attempt = breaker
        .execute(|| async {
            let outcome = match dial(client, upstream_timeout, upstream_req).await {
                Ok(response) if response.status().is_success() => Ok(response),
                Ok(response) => Err(ForwardError::UpstreamStatus(response.status().as_u16())),
                Err(e) => Err(e),
            };
            let verdict = if outcome.is_ok() {
                Verdict::Success
            } else {
                Verdict::Failure
            };
            (outcome, verdict)
        })
        .await;

    match attempt {
        Err(open) => {
            tracing::warn!(origin = %open.origin, "Circuit open, refusing event stream");
            (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable").into_response()
        }
        Ok(Err(e)) => {
            let kind = match e {
                ForwardError::Timeout => "timeout",
                ForwardError::UpstreamStatus(_) => "status",
                ForwardError::Dial(_) => "dial",
            };
            metrics::record_upstream_failure(&backend.id, kind);
            tracing::error!(origin = %backend.id, error = %e, "Upstream event stream failed");
            (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
        }
        Ok(Ok(upstream)) => relay(upstream, backend.id.clone(), breaker, config),
    }
}

/// Build the client response and spawn the relay task.
fn relay(
    upstream: Response<Incoming>,
    origin: String,
    breaker: Arc<CircuitBreaker>,
    config: SseConfig,
) -> Response<Body> {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);

    let upstream_stream = upstream.into_body().into_data_stream();
    tokio::spawn(relay_loop(upstream_stream, tx, origin, breaker, config));

    let body = Body::from_stream(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }));

    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

/// Multiplex upstream chunks and heartbeats over the client channel.
async fn relay_loop(
    mut upstream: BodyDataStream<Incoming>,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    origin: String,
    breaker: Arc<CircuitBreaker>,
    config: SseConfig,
) {
    metrics::record_long_lived("sse", 1);

    let retry = Bytes::from(format!("retry: {}\n\n", config.retry_hint_ms));
    if tx.send(Ok(retry)).await.is_err() {
        client_gone(&origin, &breaker);
        metrics::record_long_lived("sse", -1);
        return;
    }

    let heartbeat_interval = Duration::from_millis(config.heartbeat_interval_ms);
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await; // the first tick fires immediately

    let mut at_boundary = true;
    let mut last_write = Instant::now();

    loop {
        tokio::select! {
            chunk = upstream.next() => match chunk {
                Some(Ok(bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    at_boundary = bytes.ends_with(b"\n\n");
                    last_write = Instant::now();
                    if tx.send(Ok(bytes)).await.is_err() {
                        client_gone(&origin, &breaker);
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(origin = %origin, error = %e, "Upstream event stream error");
                    metrics::record_upstream_failure(&origin, "stream");
                    breaker.on_failure();
                    break;
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                if at_boundary && last_write.elapsed() >= heartbeat_interval {
                    if tx.send(Ok(Bytes::from_static(b": heartbeat\n\n"))).await.is_err() {
                        client_gone(&origin, &breaker);
                        break;
                    }
                }
            }
        }
    }

    metrics::record_long_lived("sse", -1);
    tracing::debug!(origin = %origin, "Event stream relay finished");
}

/// The client write side failed after headers were flushed: terminate the
/// exchange and count it against the origin's breaker.
fn client_gone(origin: &str, breaker: &CircuitBreaker) {
    tracing::debug!(origin = %origin, "Client went away, ending event stream");
    metrics::record_client_abort(origin);
    breaker.on_failure();
}
