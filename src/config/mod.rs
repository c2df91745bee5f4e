//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (env substitution, parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Unknown balancer strategies are refused, not defaulted

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::ProxyConfig;
pub use schema::{BalancerConfig, BreakerConfig, OriginConfig, Strategy};
pub use schema::{ContentConfig, IpFilterConfig, IpFilterMode, RateLimitConfig, SecurityConfig};
pub use schema::{ListenerConfig, SseConfig, TimeoutConfig, WsConfig};
