//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Origin server definitions. Fixed for the process lifetime.
    pub origins: Vec<OriginConfig>,

    /// Load balancer settings.
    pub balancer: BalancerConfig,

    /// Circuit breaker settings (applied per origin).
    pub breaker: BreakerConfig,

    /// Admission control settings.
    pub security: SecurityConfig,

    /// Upstream timeout configuration.
    pub timeouts: TimeoutConfig,

    /// WebSocket keepalive settings.
    pub ws: WsConfig,

    /// Server-Sent Events relay settings.
    pub sse: SseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS material paths. Loading and termination are delegated
    /// to the deployment; when set, the advertised scheme becomes "https".
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Origin server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginConfig {
    /// Unique origin identifier.
    pub id: String,

    /// Absolute base URL (e.g., "http://127.0.0.1:9001").
    pub url: String,

    /// Weight reserved for weighted strategies (unused by the shipped ones).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Health probe path (reserved).
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_weight() -> u32 {
    1
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// Selection strategy.
///
/// A closed set: unknown names fail deserialization rather than falling
/// back, and weighted/least-connection variants are not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Selection policy applied across available origins.
    pub strategy: Strategy,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Minimum dwell in the open state before a probe is allowed, in ms.
    pub open_duration_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 50,
            open_duration_ms: 60_000,
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Client IP filtering.
    pub ip: IpFilterConfig,

    /// Per-client rate limiting.
    pub rate: RateLimitConfig,

    /// Content-type families accepted on POST/PUT bodies.
    pub content: ContentConfig,
}

/// Interpretation of the IP membership lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IpFilterMode {
    AllowList,
    #[default]
    DenyList,
}

/// IP filter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct IpFilterConfig {
    /// Enable the filter. Disabled means every client passes.
    pub enabled: bool,

    /// List interpretation.
    pub mode: IpFilterMode,

    /// Membership set for allow-list mode.
    pub allow: Vec<String>,

    /// Membership set for deny-list mode.
    pub deny: Vec<String>,
}

/// Rate limiting configuration (fixed window per client IP).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum admitted requests per window.
    pub limit: u32,

    /// Window length in seconds.
    pub window_s: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 100,
            window_s: 1,
        }
    }
}

/// Content-type admission for request bodies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Enforce the allow-list on POST/PUT requests.
    pub enabled: bool,

    /// Accepted content-type prefixes. A request without a content-type
    /// header passes.
    pub allowed_types: Vec<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_types: vec![
                "application/json".to_string(),
                "application/x-www-form-urlencoded".to_string(),
                "multipart/form-data".to_string(),
                "text/".to_string(),
                "application/octet-stream".to_string(),
            ],
        }
    }
}

/// Upstream timeout configuration.
///
/// The bound applies to the dial and response-headers phase only; body
/// streaming is bounded by peer liveness.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream dial + response-headers deadline in milliseconds.
    pub upstream_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { upstream_ms: 30_000 }
    }
}

/// WebSocket keepalive configuration (server side).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WsConfig {
    /// Interval between server-initiated ping frames, in ms.
    pub ping_interval_ms: u64,

    /// Idle time after which the connection is closed, in ms.
    pub idle_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30_000,
            idle_timeout_ms: 60_000,
        }
    }
}

/// Server-Sent Events relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SseConfig {
    /// Reconnect hint sent in the initial `retry:` directive, in ms.
    pub retry_hint_ms: u64,

    /// Interval between `: heartbeat` comments when no data flows, in ms.
    pub heartbeat_interval_ms: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            retry_hint_ms: 3_000,
            heartbeat_interval_ms: 15_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Serve the textual counter snapshot at /metrics.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}
