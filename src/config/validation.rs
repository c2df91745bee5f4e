//! Configuration validation logic.

use std::collections::HashSet;

use url::Url;

use crate::config::schema::ProxyConfig;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a ProxyConfig for semantic correctness.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. At least one origin must exist.
    if config.origins.is_empty() {
        errors.push(ValidationError("at least one origin is required".to_string()));
    }

    // 2. Origin ids must be unique; URLs must be absolute http(s).
    let mut seen = HashSet::new();
    for origin in &config.origins {
        if !seen.insert(origin.id.as_str()) {
            errors.push(ValidationError(format!(
                "duplicate origin id '{}'",
                origin.id
            )));
        }
        match Url::parse(&origin.url) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    errors.push(ValidationError(format!(
                        "origin '{}' has unsupported scheme '{}'",
                        origin.id,
                        url.scheme()
                    )));
                }
                if url.host_str().is_none() {
                    errors.push(ValidationError(format!(
                        "origin '{}' URL has no host",
                        origin.id
                    )));
                }
            }
            Err(e) => {
                errors.push(ValidationError(format!(
                    "origin '{}' URL is invalid: {}",
                    origin.id, e
                )));
            }
        }
        if origin.weight == 0 {
            errors.push(ValidationError(format!(
                "origin '{}' weight must be >= 1",
                origin.id
            )));
        }
    }

    // 3. Breaker thresholds.
    if config.breaker.failure_threshold == 0 {
        errors.push(ValidationError(
            "breaker.failure_threshold must be > 0".to_string(),
        ));
    }

    // 4. Rate limit window.
    if config.security.rate.enabled && config.security.rate.window_s == 0 {
        errors.push(ValidationError(
            "security.rate.window_s must be > 0".to_string(),
        ));
    }

    // 5. Keepalive intervals.
    if config.ws.ping_interval_ms == 0 {
        errors.push(ValidationError("ws.ping_interval_ms must be > 0".to_string()));
    }
    if config.sse.heartbeat_interval_ms == 0 {
        errors.push(ValidationError(
            "sse.heartbeat_interval_ms must be > 0".to_string(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
