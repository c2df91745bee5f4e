//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Build the upstream request (URL, filtered headers, forwarding set)
//! - Stream request and response bodies without buffering
//! - Map upstream failures to client responses and breaker verdicts
//!
//! # Design Decisions
//! - The dial + response-headers phase runs under a deadline; body
//!   streaming is bounded only by peer liveness
//! - Upstream 5xx is forwarded verbatim to the client but still counts
//!   as a breaker failure
//! - Mid-stream upstream read errors are reported to the breaker from
//!   the relay stream

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::Stream;
use http_body_util::{BodyDataStream, BodyExt};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::balancer::Backend;
use crate::breaker::{CircuitBreaker, Verdict};
use crate::observability::metrics;
use crate::proxy::{forwarded_headers, ForwardContext, ForwardError};

/// Shared upstream client: pooled, HTTP/1.1, http and https origins.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Build the shared upstream client.
pub fn build_client() -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.enforce_http(false);

    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .expect("failed to load native root certificates")
        .https_or_http()
        .enable_http1()
        .wrap_connector(connector);

    Client::builder(TokioExecutor::new()).build(https)
}

/// Forward one HTTP exchange to `backend`, gated by `breaker`.
pub async fn forward(
    client: &UpstreamClient,
    backend: Arc<Backend>,
    breaker: Arc<CircuitBreaker>,
    ctx: &ForwardContext,
    upstream_timeout: Duration,
    request: Request<Body>,
) -> Response<Body> {
    let method = request.method().clone();
    let upstream_req = match build_upstream_request(&backend, ctx, request) {
        Ok(req) => req,
        Err(response) => return response,
    };

    let attempt = breaker
        .execute(|| async {
            let outcome = dial(client, upstream_timeout, upstream_req).await;
            let verdict = match &outcome {
                Ok(response) if response.status().is_server_error() => Verdict::Failure,
                Ok(_) => Verdict::Success,
                Err(_) => Verdict::Failure,
            };
            (outcome, verdict)
        })
        .await;

    match attempt {
        Err(open) => {
            tracing::warn!(origin = %open.origin, "Circuit open, refusing exchange");
            (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable").into_response()
        }
        Ok(Err(e)) => {
            let kind = match e {
                ForwardError::Timeout => "timeout",
                _ => "dial",
            };
            metrics::record_upstream_failure(&backend.id, kind);
            tracing::error!(origin = %backend.id, error = %e, "Upstream request failed");
            (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
        }
        Ok(Ok(upstream)) => relay_response(&backend, breaker, &method, upstream),
    }
}

/// Build the outbound request: origin scheme+authority, inbound path and
/// query verbatim, filtered headers plus the forwarding set.
fn build_upstream_request(
    backend: &Backend,
    ctx: &ForwardContext,
    request: Request<Body>,
) -> Result<Request<Body>, Response<Body>> {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = format!(
        "{}://{}{}",
        backend.scheme(),
        backend.authority(),
        path_and_query
    );

    // GET/HEAD carry no body upstream.
    let body = if parts.method == Method::GET || parts.method == Method::HEAD {
        Body::empty()
    } else {
        body
    };

    let mut upstream_req = match Request::builder().method(parts.method).uri(uri).body(body) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(origin = %backend.id, error = %e, "Failed to build upstream request");
            return Err(
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal proxy error").into_response(),
            );
        }
    };
    *upstream_req.headers_mut() = forwarded_headers(&parts.headers, ctx);

    Ok(upstream_req)
}

/// Dial the origin and wait for response headers under the deadline.
pub(crate) async fn dial(
    client: &UpstreamClient,
    deadline: Duration,
    request: Request<Body>,
) -> Result<Response<Incoming>, ForwardError> {
    match tokio::time::timeout(deadline, client.request(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(ForwardError::Dial(e.to_string())),
        Err(_) => Err(ForwardError::Timeout),
    }
}

/// Pass the upstream response through, streaming the body.
fn relay_response(
    backend: &Backend,
    breaker: Arc<CircuitBreaker>,
    method: &Method,
    upstream: Response<Incoming>,
) -> Response<Body> {
    let (mut parts, body) = upstream.into_parts();

    if parts.status.is_server_error() {
        metrics::record_upstream_failure(&backend.id, "status");
    }

    parts
        .headers
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/octet-stream"));

    // HEAD/204/304 bodies are dropped unread by the server, so abort
    // detection would misfire; relay them unmetered.
    let bodyless = *method == Method::HEAD
        || parts.status == StatusCode::NO_CONTENT
        || parts.status == StatusCode::NOT_MODIFIED;
    if bodyless {
        return Response::from_parts(parts, Body::from_stream(body.into_data_stream()));
    }

    let expected = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let stream = RelayStream {
        inner: body.into_data_stream(),
        origin: backend.id.clone(),
        breaker,
        expected,
        relayed: 0,
        finished: false,
    };

    Response::from_parts(parts, Body::from_stream(stream))
}

/// Upstream-to-client body relay with breaker accounting.
///
/// Upstream read errors are reported as they surface. Dropping the stream
/// before the upstream body finished means the client write side failed
/// after headers were flushed; that terminates the exchange and counts as
/// a failure too.
struct RelayStream {
    inner: BodyDataStream<Incoming>,
    origin: String,
    breaker: Arc<CircuitBreaker>,
    /// Declared content length, when the upstream sent one.
    expected: Option<u64>,
    relayed: u64,
    finished: bool,
}

impl Stream for RelayStream {
    type Item = Result<Bytes, hyper::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.relayed += bytes.len() as u64;
                // With a declared length the server may not poll again
                // after the final chunk, so completion is tracked here.
                if this.expected.is_some_and(|total| this.relayed >= total) {
                    this.finished = true;
                }
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                tracing::warn!(origin = %this.origin, error = %e, "Upstream body stream failed");
                metrics::record_upstream_failure(&this.origin, "stream");
                this.breaker.on_failure();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(origin = %self.origin, "Client went away mid-body, terminating exchange");
            metrics::record_client_abort(&self.origin);
            self.breaker.on_failure();
        }
    }
}
