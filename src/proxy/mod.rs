//! Request-plane subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, admission, origin selection, dispatch)
//!     → http.rs       plain HTTP exchange, streamed both ways
//!     → websocket.rs  bidirectional frame splice
//!     → sse.rs        text/event-stream relay with heartbeats
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - One shared upstream client (connection pooled, HTTP/1.1, https-capable)
//! - The three adapters share header forwarding through ForwardContext
//! - Breaker verdicts are decided here, never inside the breaker

pub mod http;
pub mod server;
pub mod sse;
pub mod websocket;

pub use server::ProxyServer;

use axum::http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

/// Constant identifying this proxy to origins, sent as X-Proxy-ID.
pub const PROXY_ID: &str = "edgegate/0.1";

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
const X_PROXY_ID: HeaderName = HeaderName::from_static("x-proxy-id");

/// Upstream transport failures, mapped to client responses by the adapters.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Dial, DNS, or reset before the status line.
    #[error("upstream dial failed: {0}")]
    Dial(String),

    /// The dial + headers phase exceeded its deadline.
    #[error("upstream timed out")]
    Timeout,

    /// The upstream answered an event-stream request with a non-2xx status.
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),
}

/// Per-exchange facts the adapters need to build forwarding headers.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    /// Socket peer address of the client (X-Forwarded-For is not trusted).
    pub client_ip: String,
    /// Scheme the listener speaks, as advertised to origins.
    pub scheme: &'static str,
    /// Local port the listener is bound to.
    pub local_port: u16,
}

/// Copy inbound headers minus hop-by-hop ones and append the forwarding set.
///
/// `Host`, `Content-Length` and `Transfer-Encoding` are left for the
/// transport to regenerate.
pub(crate) fn forwarded_headers(inbound: &HeaderMap, ctx: &ForwardContext) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 5);
    for (name, value) in inbound {
        if is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let xff = inbound
        .get(X_FORWARDED_FOR)
        .cloned()
        .or_else(|| HeaderValue::from_str(&ctx.client_ip).ok());
    if let Some(xff) = xff {
        headers.insert(X_FORWARDED_FOR, xff);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(ctx.scheme));
    if let Some(host) = inbound.get(HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    if let Ok(port) = HeaderValue::from_str(&ctx.local_port.to_string()) {
        headers.insert(X_FORWARDED_PORT, port);
    }
    headers.insert(X_PROXY_ID, HeaderValue::from_static(PROXY_ID));

    headers
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == HOST || name == CONTENT_LENGTH || name == TRANSFER_ENCODING
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ForwardContext {
        ForwardContext {
            client_ip: "10.1.2.3".into(),
            scheme: "http",
            local_port: 8080,
        }
    }

    #[test]
    fn appends_forwarding_set() {
        let mut inbound = HeaderMap::new();
        inbound.insert(HOST, HeaderValue::from_static("proxy.example.com"));
        inbound.insert("accept", HeaderValue::from_static("application/json"));

        let headers = forwarded_headers(&inbound, &ctx());

        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.1.2.3");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "proxy.example.com");
        assert_eq!(headers.get("x-forwarded-port").unwrap(), "8080");
        assert_eq!(headers.get("x-proxy-id").unwrap(), PROXY_ID);
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn drops_hop_by_hop_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(HOST, HeaderValue::from_static("a"));
        inbound.insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        inbound.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let headers = forwarded_headers(&inbound, &ctx());

        assert!(headers.get(HOST).is_none());
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert!(headers.get(TRANSFER_ENCODING).is_none());
    }

    #[test]
    fn existing_xff_is_preserved() {
        let mut inbound = HeaderMap::new();
        inbound.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));

        let headers = forwarded_headers(&inbound, &ctx());
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.9");
    }
}
