//! Proxy entry point.
//!
//! # Responsibilities
//! - Build the Axum router and shared state
//! - Admit each request through the security gate
//! - Dispatch by protocol: WebSocket upgrade, event stream, plain HTTP
//! - Select an origin and gate the exchange on its breaker
//! - Serve the textual metrics snapshot

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State, WebSocketUpgrade},
    http::header::{ACCEPT, CONTENT_TYPE, UPGRADE},
    http::{HeaderMap, Request, Response, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::balancer::{self, BackendRegistry, LoadBalancer, SelectError};
use crate::breaker::{BreakerRegistry, BreakerState, TransitionEvent, TransitionObserver};
use crate::config::{ConfigError, ProxyConfig};
use crate::config::validation::ValidationError;
use crate::observability::{logging, metrics};
use crate::proxy::http::{self, UpstreamClient};
use crate::proxy::{sse, websocket, ForwardContext};
use crate::security::SecurityGate;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ProxyConfig>,
    gate: Arc<SecurityGate>,
    registry: Arc<BackendRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    breakers: Arc<BreakerRegistry>,
    client: UpstreamClient,
    metrics: Option<PrometheusHandle>,
    local_port: Arc<AtomicU16>,
}

impl AppState {
    fn scheme(&self) -> &'static str {
        if self.config.listener.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

/// Observer wired into the breaker registry: every transition lands in the
/// metrics snapshot, in CAS order per origin, and drives the availability
/// bit. An opened origin is taken out of selection for the dwell and put
/// back once a probe becomes due, so the half-open probe can be routed.
struct ProxyObserver {
    balancer: Arc<dyn LoadBalancer>,
    reopen_after: Duration,
}

impl TransitionObserver for ProxyObserver {
    fn on_transition(&self, event: &TransitionEvent) {
        metrics::record_breaker_transition(&event.origin, event.from, event.to);
        match event.to {
            BreakerState::Open => {
                self.balancer.mark_failed(&event.origin);
                let balancer = self.balancer.clone();
                let origin = event.origin.clone();
                let dwell = self.reopen_after;
                tokio::spawn(async move {
                    tokio::time::sleep(dwell).await;
                    balancer.mark_available(&origin);
                });
            }
            BreakerState::Closed | BreakerState::HalfOpen => {
                self.balancer.mark_available(&event.origin);
            }
        }
    }
}

/// The externally bound proxy server.
pub struct ProxyServer {
    router: Router,
    config: Arc<ProxyConfig>,
    local_port: Arc<AtomicU16>,
}

impl ProxyServer {
    /// Create a new proxy server from a validated configuration.
    ///
    /// `metrics` is the render handle of an installed Prometheus recorder;
    /// pass `None` to disable the /metrics route.
    pub fn new(
        config: ProxyConfig,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Result<Self, ConfigError> {
        let registry = Arc::new(BackendRegistry::from_config(&config.origins).map_err(|e| {
            ConfigError::Validation(vec![ValidationError(format!("origin URL invalid: {}", e))])
        })?);

        let balancer = balancer::build(config.balancer.strategy, registry.clone());
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker.clone(),
            Arc::new(ProxyObserver {
                balancer: balancer.clone(),
                reopen_after: Duration::from_millis(config.breaker.open_duration_ms),
            }),
        ));
        let gate = Arc::new(SecurityGate::new(config.security.clone()));
        let client = http::build_client();

        // Seed the per-origin gauges so the snapshot always carries them.
        for origin in &config.origins {
            metrics::record_breaker_state(&origin.id, BreakerState::Closed);
            metrics::record_origin_available(&origin.id, true);
        }

        let config = Arc::new(config);
        let local_port = Arc::new(AtomicU16::new(0));
        let state = AppState {
            config: config.clone(),
            gate,
            registry,
            balancer,
            breakers,
            client,
            metrics: metrics_handle,
            local_port: local_port.clone(),
        };

        let router = Self::build_router(&state);
        Ok(Self {
            router,
            config,
            local_port,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: &AppState) -> Router {
        let mut router = Router::new();
        if state.config.observability.metrics_enabled && state.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state.clone())
            .layer(axum::middleware::from_fn(logging::access_log))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener until
    /// the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        self.local_port.store(addr.port(), Ordering::Relaxed);

        if self.config.listener.tls.is_some() {
            tracing::warn!(
                "TLS material configured; termination is delegated to the deployment, serving plaintext"
            );
        }

        tracing::info!(
            address = %addr,
            strategy = ?self.config.balancer.strategy,
            origins = self.config.origins.len(),
            "Proxy listening"
        );

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("Proxy stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler: admit, dispatch, select, gate, forward.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let client_ip = addr.ip().to_string();

    // 1. Admission. Rejects are cheap: no origin contacted, no breaker touched.
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if let Err(rejection) = state.gate.admit(
        request.method(),
        request.uri().path(),
        request.uri().query(),
        content_type,
        &client_ip,
    ) {
        metrics::record_gate_rejection(rejection.reason.as_str());
        tracing::warn!(
            client = %client_ip,
            reason = rejection.reason.as_str(),
            "Request rejected at the gate"
        );
        return (rejection.status, rejection.message).into_response();
    }

    // 2. Selection.
    let backend = match state.balancer.select() {
        Ok(backend) => backend,
        Err(SelectError::NoAvailableBackend) => {
            tracing::warn!("No available origin");
            return (StatusCode::SERVICE_UNAVAILABLE, "No available origin").into_response();
        }
    };
    let breaker = state.breakers.get(&backend.id);

    let ctx = ForwardContext {
        client_ip,
        scheme: state.scheme(),
        local_port: state.local_port.load(Ordering::Relaxed),
    };
    let upstream_timeout = Duration::from_millis(state.config.timeouts.upstream_ms);

    // 3. Dispatch by protocol.
    if is_websocket_upgrade(request.headers()) {
        let (mut parts, _body) = request.into_parts();
        let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(ws) => ws,
            Err(rejection) => return rejection.into_response(),
        };
        let request = Request::from_parts(parts, Body::empty());
        return websocket::handle_upgrade(
            ws,
            backend,
            breaker,
            &ctx,
            state.config.ws.clone(),
            request,
        )
        .await;
    }

    if wants_event_stream(&request) {
        let (parts, _) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        return sse::forward(
            &state.client,
            backend,
            breaker,
            &ctx,
            state.config.sse.clone(),
            upstream_timeout,
            &parts.headers,
            &path_and_query,
        )
        .await;
    }

    http::forward(
        &state.client,
        backend,
        breaker,
        &ctx,
        upstream_timeout,
        request,
    )
    .await
}

/// A request asking to switch protocols to WebSocket.
fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// GET with an Accept of text/event-stream selects the SSE adapter;
/// any other method falls through to plain HTTP.
fn wants_event_stream(request: &Request<Body>) -> bool {
    request.method() == axum::http::Method::GET
        && request
            .headers()
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|accept| accept.contains("text/event-stream"))
            .unwrap_or(false)
}

/// Textual snapshot of counters, breaker transitions and per-origin state.
async fn metrics_handler(State(state): State<AppState>) -> Response<Body> {
    let Some(handle) = &state.metrics else {
        return (StatusCode::NOT_FOUND, "metrics disabled").into_response();
    };

    // Refresh point-in-time gauges before rendering.
    for (origin, breaker_state) in state.breakers.states() {
        metrics::record_breaker_state(&origin, breaker_state);
    }
    for backend in state.registry.all_backends() {
        metrics::record_origin_available(&backend.id, state.registry.is_available(&backend.id));
    }

    (
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        handle.render(),
    )
        .into_response()
}
