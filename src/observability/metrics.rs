//! Metrics collection and exposition.

use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::breaker::BreakerState;

/// Install the Prometheus recorder and return the render handle.
///
/// The snapshot is served by the proxy router itself at /metrics; no side
/// listener is spawned.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed exchange: inbound method, response class, latency.
pub fn record_request(method: &str, status: u16, started: Instant) {
    counter!("proxy_requests_total", "method" => method.to_string()).increment(1);
    counter!("proxy_responses_total", "class" => format!("{}xx", status / 100)).increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}

/// Record an admission rejection by reason.
pub fn record_gate_rejection(reason: &'static str) {
    counter!("proxy_gate_rejections_total", "reason" => reason).increment(1);
}

/// Record one breaker transition and refresh the state gauge.
pub fn record_breaker_transition(origin: &str, from: BreakerState, to: BreakerState) {
    counter!(
        "proxy_breaker_transitions_total",
        "origin" => origin.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str(),
    )
    .increment(1);
    record_breaker_state(origin, to);
}

/// Gauge for the current breaker state of one origin.
/// 0 = closed, 1 = open, 2 = half-open.
pub fn record_breaker_state(origin: &str, state: BreakerState) {
    gauge!("proxy_breaker_state", "origin" => origin.to_string()).set(state as u8 as f64);
}

/// Gauge for one origin's availability bit.
pub fn record_origin_available(origin: &str, available: bool) {
    let value = if available { 1.0 } else { 0.0 };
    gauge!("proxy_origin_available", "origin" => origin.to_string()).set(value);
}

/// Count exchanges terminated by the client after headers were flushed.
pub fn record_client_abort(origin: &str) {
    counter!("proxy_client_aborts_total", "origin" => origin.to_string()).increment(1);
}

/// Count upstream failures by kind (dial, timeout, status, stream, write).
pub fn record_upstream_failure(origin: &str, kind: &'static str) {
    counter!(
        "proxy_upstream_failures_total",
        "origin" => origin.to_string(),
        "kind" => kind,
    )
    .increment(1);
}

/// Track long-lived relays (websocket, sse). `delta` is +1/-1.
pub fn record_long_lived(kind: &'static str, delta: i64) {
    let g = gauge!("proxy_long_lived_connections", "kind" => kind);
    if delta >= 0 {
        g.increment(delta as f64);
    } else {
        g.decrement((-delta) as f64);
    }
}
