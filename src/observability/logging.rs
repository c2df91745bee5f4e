//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from configuration
//! - Attach a request id to each exchange
//! - Emit one access-log line per completed exchange
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - RUST_LOG overrides the configured level when set
//! - Request ids are UUID v4, echoed back as X-Request-ID

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::observability::metrics;

/// Request id attached to request extensions.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Initialize the tracing subscriber. Call once at startup.
pub fn init(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("edgegate={},tower_http=warn", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Access-log middleware: request id, counters, one line per exchange.
pub async fn access_log(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    request.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(request).await;

    let status = response.status();
    metrics::record_request(method.as_str(), status.as_u16(), started);

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }

    tracing::info!(
        request_id = %request_id,
        client = %addr.ip(),
        method = %method,
        path = %path,
        status = status.as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
