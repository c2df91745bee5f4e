//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, access log)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → GET /metrics on the proxy router (textual snapshot)
//! ```
//!
//! # Design Decisions
//! - Request id flows through all log lines of an exchange
//! - Metrics are cheap (atomic increments behind the metrics facade)
//! - Breaker transitions are counted per origin with a state gauge

pub mod logging;
pub mod metrics;
