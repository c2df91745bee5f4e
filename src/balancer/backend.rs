//! Origin server abstraction.
//!
//! # Responsibilities
//! - Represent a single origin server
//! - Hold its parsed base URL for upstream dialing
//! - Immutable after construction; availability lives in the registry

use url::Url;

use crate::config::OriginConfig;

/// A single origin server.
///
/// Created at startup from configuration and never mutated afterwards, so
/// instances are freely shared across request tasks behind `Arc`.
#[derive(Debug)]
pub struct Backend {
    /// Stable identifier, unique within the registry.
    pub id: String,
    /// Absolute base URL (scheme + authority, optional base path).
    pub url: Url,
    /// Weight reserved for weighted strategies.
    pub weight: u32,
    /// Health probe path (reserved).
    pub health_path: String,
}

impl Backend {
    /// Build a backend from its configuration entry.
    ///
    /// The URL has already passed validation; a parse failure here means the
    /// config was not validated and is reported as such.
    pub fn from_config(config: &OriginConfig) -> Result<Self, url::ParseError> {
        let url = Url::parse(&config.url)?;
        Ok(Self {
            id: config.id.clone(),
            url,
            weight: config.weight,
            health_path: config.health_path.clone(),
        })
    }

    /// Scheme of the origin ("http" or "https").
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Authority (host:port) of the origin.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        let backend = Backend::from_config(&OriginConfig {
            id: "b1".into(),
            url: "http://127.0.0.1:9001".into(),
            weight: 1,
            health_path: "/health".into(),
        })
        .unwrap();
        assert_eq!(backend.scheme(), "http");
        assert_eq!(backend.authority(), "127.0.0.1:9001");
    }

    #[test]
    fn authority_without_explicit_port() {
        let backend = Backend::from_config(&OriginConfig {
            id: "b1".into(),
            url: "https://origin.example.com".into(),
            weight: 1,
            health_path: "/health".into(),
        })
        .unwrap();
        assert_eq!(backend.authority(), "origin.example.com");
    }
}
